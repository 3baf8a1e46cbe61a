use std::path::PathBuf;

use clap::Parser;

use replaygen::cli::{Cli, Commands};

#[test]
fn test_parse_generate_with_overrides() {
    let cli = Cli::try_parse_from([
        "replaygen",
        "generate",
        "--trace",
        "trace.json",
        "--out",
        "src/test/java",
        "--namespace",
        "com.acme,org.example",
        "--replay-command",
        "java -jar replayer.jar",
        "--json",
    ])
    .unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Generate(args) => {
            assert_eq!(args.trace, PathBuf::from("trace.json"));
            assert_eq!(args.out, Some(PathBuf::from("src/test/java")));
            assert_eq!(args.namespace, vec!["com.acme", "org.example"]);
            assert_eq!(args.replay_command.as_deref(), Some("java -jar replayer.jar"));
            assert!(!args.dry_run);
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_parse_generate_dry_run_defaults() {
    let cli = Cli::try_parse_from(["replaygen", "generate", "-t", "t.json", "--dry-run"]).unwrap();
    match cli.command {
        Commands::Generate(args) => {
            assert!(args.dry_run);
            assert!(args.out.is_none());
            assert!(args.namespace.is_empty());
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_parse_inspect_and_global_config() {
    let cli = Cli::try_parse_from([
        "replaygen",
        "--config",
        "ci.yaml",
        "inspect",
        "--trace",
        "t.json",
        "--rejected-only",
    ])
    .unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("ci.yaml")));
    match cli.command {
        Commands::Inspect(args) => {
            assert_eq!(args.trace, PathBuf::from("t.json"));
            assert!(args.rejected_only);
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_parse_init_defaults_to_current_directory() {
    let cli = Cli::try_parse_from(["replaygen", "init", "--force"]).unwrap();
    match cli.command {
        Commands::Init(args) => {
            assert!(args.force);
            assert_eq!(args.path, PathBuf::from("."));
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_generate_requires_a_trace() {
    assert!(Cli::try_parse_from(["replaygen", "generate"]).is_err());
    assert!(Cli::try_parse_from(["replaygen", "frobnicate"]).is_err());
}
