//! Packs recreated test cases into test files.
//!
//! Cases are grouped by the package they must live in and by the class
//! under test, then split into files of at most `max_cases_per_file` cases.
//! A case that was not confirmed by replay is dropped here as well.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::domain::models::method::{package_of, simple_name};
use crate::domain::models::{AssertionKind, OutputConfig, TestCase};

/// One generated test class.
#[derive(Debug, Clone, Serialize)]
pub struct TestFile {
    /// Package the class is declared in.
    pub package: String,
    /// Simple name of the generated class.
    pub class_name: String,
    /// Type whose methods the cases exercise.
    pub class_under_test: String,
    pub cases: Vec<TestCase>,
}

impl TestFile {
    /// Path relative to the output directory, one directory per package
    /// segment.
    pub fn relative_path(&self) -> PathBuf {
        let mut path: PathBuf = self.package.split('.').filter(|s| !s.is_empty()).collect();
        path.push(format!("{}.java", self.class_name));
        path
    }

    /// Number of cases asserting `kind`.
    pub fn count(&self, kind: AssertionKind) -> usize {
        self.cases.iter().filter(|c| c.assertion_kind() == kind).count()
    }
}

/// Groups test cases into test classes.
pub struct SuitePacker {
    max_cases_per_file: usize,
    class_suffix: String,
}

impl SuitePacker {
    /// Packer honouring the output file limits.
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            max_cases_per_file: config.max_cases_per_file.max(1),
            class_suffix: config.class_suffix.clone(),
        }
    }

    /// Package a case is declared in. An unconstrained case goes next to its
    /// class under test.
    fn package_for(case: &TestCase) -> String {
        if case.required_package.is_empty() {
            package_of(&case.class_under_test).to_string()
        } else {
            case.required_package.clone()
        }
    }

    fn class_base(&self, class_under_test: &str) -> String {
        let simple: String = simple_name(class_under_test)
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        format!("{simple}{}", self.class_suffix)
    }

    /// Group cases by package and class under test, splitting groups that
    /// exceed the per-file limit.
    pub fn pack(&self, cases: Vec<TestCase>) -> Vec<TestFile> {
        let mut groups: BTreeMap<(String, String), Vec<TestCase>> = BTreeMap::new();
        for case in cases {
            if !case.is_recreated() {
                warn!(case = %case.name, "dropping test case that was not recreated");
                continue;
            }
            let key = (Self::package_for(&case), case.class_under_test.clone());
            groups.entry(key).or_default().push(case);
        }

        let mut files = Vec::new();
        for ((package, class_under_test), cases) in groups {
            let base = self.class_base(&class_under_test);
            let mut remaining = cases.into_iter().peekable();
            let mut part = 0usize;
            while remaining.peek().is_some() {
                let chunk: Vec<TestCase> = remaining.by_ref().take(self.max_cases_per_file).collect();
                let class_name = if part == 0 {
                    base.clone()
                } else {
                    format!("{base}{}", part + 1)
                };
                files.push(TestFile {
                    package: package.clone(),
                    class_name,
                    class_under_test: class_under_test.clone(),
                    cases: chunk,
                });
                part += 1;
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Assertion, Call, ExecutionId, MethodId};
    use std::collections::BTreeMap;

    fn case(name: &str, class: &str, package: &str, recreated: bool) -> TestCase {
        let mut case = TestCase::new(
            name.to_string(),
            ExecutionId(0),
            class.to_string(),
            package.to_string(),
            vec![],
            Call {
                method: MethodId(1),
                declaring_type: class.to_string(),
                name: "run".to_string(),
                receiver: None,
                args: vec![],
                constructor: false,
            },
            None,
            Assertion::Throws {
                exception: "java.lang.IllegalStateException".to_string(),
            },
            BTreeMap::new(),
            None,
        );
        if recreated {
            case.mark_recreated();
        }
        case
    }

    fn packer(limit: usize) -> SuitePacker {
        SuitePacker::new(&OutputConfig {
            max_cases_per_file: limit,
            ..OutputConfig::default()
        })
    }

    #[test]
    fn test_files_respect_case_limit() {
        let cases = (0..5)
            .map(|i| case(&format!("testRun{i}"), "com.acme.Counter", "", true))
            .collect();
        let files = packer(2).pack(cases);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].class_name, "CounterReplayTest");
        assert_eq!(files[1].class_name, "CounterReplayTest2");
        assert_eq!(files[2].cases.len(), 1);
        assert!(files.iter().all(|f| f.package == "com.acme"));
        assert_eq!(
            files[0].relative_path(),
            PathBuf::from("com/acme/CounterReplayTest.java")
        );
    }

    #[test]
    fn test_unrecreated_cases_are_dropped() {
        let files = packer(10).pack(vec![
            case("testA0", "com.acme.Counter", "", false),
            case("testB0", "com.acme.Counter", "", true),
        ]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].cases.len(), 1);
        assert_eq!(files[0].cases[0].name, "testB0");
        assert_eq!(files[0].count(AssertionKind::Exception), 1);
    }

    #[test]
    fn test_required_package_separates_files() {
        let files = packer(10).pack(vec![
            case("testA0", "com.acme.Counter", "", true),
            case("testB0", "com.acme.Counter", "com.acme.internal", true),
            case("testC0", "com.acme.Outer$Inner", "", true),
        ]);
        assert_eq!(files.len(), 3);
        assert!(files
            .iter()
            .any(|f| f.package == "com.acme.internal" && f.class_name == "CounterReplayTest"));
        assert!(files.iter().any(|f| f.class_name == "Outer_InnerReplayTest"));
    }
}
