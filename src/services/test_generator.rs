//! Generation driver.
//!
//! Runs analysis and assembly for every requested target, then hands the
//! assembled cases to the verification gate. Infeasible targets are skipped
//! and counted; a trace-integrity fault skips only the offending target.
//! Only corrupted store state propagates out of [`TestGenerator::generate`].

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AssertionKind, ExecutionId, ExecutionTrace, TestCase};
use crate::services::reconstruction_analyzer::{
    ReconstructionAnalyzer, ReconstructionPlan, Rejection, Verdict,
};
use crate::services::recreation_verifier::{
    ExpectedOutcome, RecreationVerifier, VerificationJob, VerificationStatus,
};
use crate::services::test_assembler::TestAssembler;

/// Summary of one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Identifier logged with every event of the run.
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Distinct targets looked at.
    pub considered: usize,
    /// Targets that passed analysis and were assembled.
    pub assembled: usize,
    /// Cases confirmed by live replay.
    pub recreated: usize,
    /// Targets skipped because of a bad trace record.
    pub integrity_faults: usize,
    /// Rejected targets per reason.
    pub rejections: BTreeMap<Rejection, usize>,
}

impl GenerationReport {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            considered: 0,
            assembled: 0,
            recreated: 0,
            integrity_faults: 0,
            rejections: BTreeMap::new(),
        }
    }

    fn reject(&mut self, rejection: Rejection) {
        *self.rejections.entry(rejection).or_insert(0) += 1;
    }

    /// Total rejected targets.
    pub fn rejected(&self) -> usize {
        self.rejections.values().sum()
    }
}

/// Recreated cases and the report of the run that produced them.
#[derive(Debug, Clone)]
pub struct GenerationRun {
    pub cases: Vec<TestCase>,
    pub report: GenerationReport,
}

/// Analysis verdict for one target, without assembly or replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetVerdict {
    pub target: ExecutionId,
    pub method: String,
    pub test_name: Option<String>,
    /// Assertion the test would make, or why there is none.
    pub verdict: Result<AssertionKind, Rejection>,
}

/// Every completed, non-synthetic execution, in recording order.
pub fn default_targets(trace: &ExecutionTrace) -> Vec<ExecutionId> {
    trace
        .executions()
        .filter(|e| e.is_completed() && !e.synthetic)
        .map(|e| e.id)
        .collect()
}

/// Drives analysis, assembly and verification over a trace.
pub struct TestGenerator {
    analyzer: ReconstructionAnalyzer,
    assembler: TestAssembler,
    verifier: RecreationVerifier,
}

impl TestGenerator {
    /// Generator built from its three stages.
    pub fn new(
        analyzer: ReconstructionAnalyzer,
        assembler: TestAssembler,
        verifier: RecreationVerifier,
    ) -> Self {
        Self {
            analyzer,
            assembler,
            verifier,
        }
    }

    /// Analyze one target. `Ok(None)` means the target was skipped because
    /// of a trace-integrity fault.
    #[instrument(skip(self, trace), fields(target = %target))]
    fn analyze_target(
        &mut self,
        trace: &mut ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Option<Verdict<ReconstructionPlan>>> {
        match self.analyzer.analyze(trace, target) {
            Ok(verdict) => {
                if let Err(rejection) = &verdict {
                    debug!(%rejection, "target rejected");
                }
                Ok(Some(verdict))
            }
            Err(err) if err.is_trace_integrity() => {
                warn!(error = %err, "skipping target with a bad trace record");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Canonical, de-duplicated targets.
    fn distinct_targets(trace: &ExecutionTrace, targets: &[ExecutionId]) -> Vec<ExecutionId> {
        let mut seen = HashSet::new();
        targets
            .iter()
            .map(|t| trace.canonical(*t))
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Verdicts for `targets` without assembling or replaying anything.
    pub fn inspect(
        &mut self,
        trace: &mut ExecutionTrace,
        targets: &[ExecutionId],
    ) -> DomainResult<Vec<TargetVerdict>> {
        self.analyzer.reset();
        let mut verdicts = Vec::new();
        for target in Self::distinct_targets(trace, targets) {
            let verdict = match self.analyze_target(trace, target)? {
                Some(Ok(plan)) => plan.assertion.ok_or(Rejection::NotAssertable),
                Some(Err(rejection)) => Err(rejection),
                None => Err(Rejection::IntegrityFault),
            };
            let (method, test_name) = match trace.execution(target) {
                Ok(execution) => (
                    self.analyzer
                        .catalog()
                        .method(execution.method)
                        .map_or_else(
                            || execution.method.to_string(),
                            |m| format!("{}.{}", m.declaring_type, m.signature()),
                        ),
                    execution.test_name.clone(),
                ),
                Err(_) => (String::from("?"), None),
            };
            verdicts.push(TargetVerdict {
                target,
                method,
                test_name,
                verdict,
            });
        }
        Ok(verdicts)
    }

    /// Generate verified test cases for `targets`. Construction search
    /// caches are cleared first, so every run starts cold.
    pub async fn generate(
        &mut self,
        trace: &mut ExecutionTrace,
        targets: &[ExecutionId],
    ) -> DomainResult<GenerationRun> {
        self.analyzer.reset();
        let mut report = GenerationReport::start();
        let mut jobs = Vec::new();
        let mut ordinals: HashMap<(String, String), usize> = HashMap::new();

        for target in Self::distinct_targets(trace, targets) {
            report.considered += 1;
            let plan = match self.analyze_target(trace, target)? {
                Some(Ok(plan)) => plan,
                Some(Err(rejection)) => {
                    report.reject(rejection);
                    continue;
                }
                None => {
                    report.integrity_faults += 1;
                    report.reject(Rejection::IntegrityFault);
                    continue;
                }
            };

            let ordinal = {
                let execution = trace.execution(target)?;
                let method = self.analyzer.catalog().require_method(execution.method)?;
                let slot = ordinals
                    .entry((method.declaring_type.clone(), method.name.clone()))
                    .or_insert(0);
                let current = *slot;
                *slot += 1;
                current
            };

            let assembled = self
                .assembler
                .assemble(trace, &plan, ordinal)
                .and_then(|case| ExpectedOutcome::of(trace, target).map(|expected| (case, expected)));
            match assembled {
                Ok((case, expected)) => {
                    report.assembled += 1;
                    jobs.push(VerificationJob { case, expected });
                }
                Err(err) if err.is_trace_integrity() => {
                    warn!(%target, error = %err, "skipping target with a bad trace record");
                    report.integrity_faults += 1;
                    report.reject(Rejection::IntegrityFault);
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            considered = report.considered,
            assembled = jobs.len(),
            runtime = self.verifier.runtime_name(),
            "verifying assembled test cases"
        );

        let mut cases = Vec::new();
        for (case, status) in self.verifier.verify_all(jobs).await? {
            match status {
                VerificationStatus::Recreated => cases.push(case),
                VerificationStatus::TimedOut => {
                    debug!(case = %case.name, "replay timed out");
                    report.reject(Rejection::VerificationTimeout);
                }
                VerificationStatus::Mismatch => report.reject(Rejection::VerificationMismatch),
                VerificationStatus::Failed(reason) => {
                    debug!(case = %case.name, %reason, "replay failed");
                    report.reject(Rejection::VerificationMismatch);
                }
            }
        }

        report.recreated = cases.len();
        report.finished_at = Some(Utc::now());
        info!(
            run_id = %report.run_id,
            recreated = report.recreated,
            rejected = report.rejected(),
            integrity_faults = report.integrity_faults,
            "generation finished"
        );
        Ok(GenerationRun { cases, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtime::{ScriptedProbe, ScriptedReplayRuntime};
    use crate::adapters::static_catalog::StaticTypeCatalog;
    use crate::domain::models::{
        AccessLevel, GenerationConfig, MethodDescriptor, MethodId, MethodKind, ObservedValue,
        TypeInfo, VerificationConfig,
    };
    use crate::domain::ports::{ReplayOutcome, TypeCatalog};
    use std::sync::Arc;

    fn static_method(id: u32, name: &str, params: &[&str], ret: &str) -> MethodDescriptor {
        MethodDescriptor {
            id: MethodId(id),
            declaring_type: "com.acme.MathUtil".to_string(),
            name: name.to_string(),
            param_types: params.iter().map(ToString::to_string).collect(),
            return_type: ret.to_string(),
            access: AccessLevel::Public,
            kind: MethodKind::Static,
            synthetic: false,
        }
    }

    fn catalog() -> Arc<StaticTypeCatalog> {
        let mut catalog = StaticTypeCatalog::new();
        catalog.add_type(TypeInfo::new("com.acme.MathUtil"));
        catalog.add_method(static_method(1, "add", &["int", "int"], "int"));
        catalog.add_method(static_method(2, "log", &["int"], "void"));
        Arc::new(catalog)
    }

    fn generator(catalog: Arc<StaticTypeCatalog>, runtime: ScriptedReplayRuntime) -> TestGenerator {
        let analyzer = ReconstructionAnalyzer::new(
            catalog.clone(),
            Arc::new(ScriptedProbe::new()),
            GenerationConfig::default(),
        );
        let assembler = TestAssembler::new(catalog, 1e-6);
        let verifier = RecreationVerifier::new(Arc::new(runtime), &VerificationConfig::default(), 1e-6);
        TestGenerator::new(analyzer, assembler, verifier)
    }

    /// `add(2, 3) = 5` twice, plus a void `log(5)`.
    fn trace(catalog: &StaticTypeCatalog) -> (ExecutionTrace, ExecutionId, ExecutionId) {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let three = trace.intern(&ObservedValue::int(3)).unwrap();
        let five = trace.intern(&ObservedValue::int(5)).unwrap();
        let add = catalog.method(MethodId(1)).unwrap();
        let first = trace
            .record_execution(add, None, vec![two, three], Some("testMath".to_string()))
            .unwrap();
        trace.complete_execution(first, Some(five), None).unwrap();
        let log = trace
            .record_execution(catalog.method(MethodId(2)).unwrap(), None, vec![five], None)
            .unwrap();
        trace.complete_execution(log, None, None).unwrap();
        (trace, first, log)
    }

    #[tokio::test]
    async fn test_generate_emits_only_recreated_cases() {
        let catalog = catalog();
        let (mut trace, add, log) = trace(&catalog);
        let runtime = ScriptedReplayRuntime::echoing(&trace).unwrap();
        let mut generator = generator(catalog, runtime);

        let run = generator.generate(&mut trace, &[add, log, add]).await.unwrap();
        assert_eq!(run.report.considered, 2);
        assert_eq!(run.cases.len(), 1);
        assert!(run.cases.iter().all(TestCase::is_recreated));
        assert_eq!(run.cases[0].name, "testAdd0");
        assert_eq!(run.report.rejections.get(&Rejection::VoidResult), Some(&1));
        assert!(run.report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_mismatching_replay_drops_the_case() {
        let catalog = catalog();
        let (mut trace, add, _) = trace(&catalog);
        let runtime = ScriptedReplayRuntime::new().with_outcome(
            "testAdd0",
            ReplayOutcome::Returned {
                value: ObservedValue::int(6),
            },
        );
        let mut generator = generator(catalog, runtime);

        let run = generator.generate(&mut trace, &[add]).await.unwrap();
        assert!(run.cases.is_empty());
        assert_eq!(run.report.assembled, 1);
        assert_eq!(
            run.report.rejections.get(&Rejection::VerificationMismatch),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_unknown_target_is_skipped_not_fatal() {
        let catalog = catalog();
        let (mut trace, add, _) = trace(&catalog);
        let runtime = ScriptedReplayRuntime::echoing(&trace).unwrap();
        let mut generator = generator(catalog, runtime);

        let run = generator
            .generate(&mut trace, &[ExecutionId(999), add])
            .await
            .unwrap();
        assert_eq!(run.report.integrity_faults, 1);
        assert_eq!(run.cases.len(), 1);
    }

    #[test]
    fn test_inspect_reports_verdicts() {
        let catalog = catalog();
        let (mut trace, add, log) = trace(&catalog);
        let runtime = ScriptedReplayRuntime::new();
        let mut generator = generator(catalog, runtime);

        let targets = default_targets(&trace);
        let verdicts = generator.inspect(&mut trace, &targets).unwrap();
        assert_eq!(verdicts.len(), 2);
        let add_verdict = verdicts.iter().find(|v| v.target == add).unwrap();
        assert_eq!(add_verdict.verdict, Ok(AssertionKind::Value));
        assert_eq!(add_verdict.test_name.as_deref(), Some("testMath"));
        let log_verdict = verdicts.iter().find(|v| v.target == log).unwrap();
        assert_eq!(log_verdict.verdict, Err(Rejection::VoidResult));
    }
}
