//! JSON trace documents.
//!
//! A document carries the type catalog and the ordered event log written by
//! the instrumentation side. Loading replays the log through a
//! [`TraceRecorder`] and seals the result, so a loaded trace went through
//! exactly the same interning and duplicate collapse as a live recording.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::runtime::ScriptedProbe;
use crate::adapters::static_catalog::StaticTypeCatalog;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionId, ExecutionTrace, MethodDescriptor, MethodId, ObservedValue, TypeInfo};
use crate::services::trace_recorder::{SealSummary, TraceRecorder};

/// One recorded event. `thread` identifies the recording thread; `call`
/// numbers are local to the document and pair a start with its end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    TestStarted {
        thread: u64,
        name: String,
    },
    TestFinished {
        thread: u64,
    },
    CallStart {
        thread: u64,
        call: u64,
        method: MethodId,
        #[serde(default)]
        receiver: Option<ObservedValue>,
        #[serde(default)]
        params: Vec<ObservedValue>,
    },
    CallEnd {
        thread: u64,
        call: u64,
        #[serde(default)]
        receiver: Option<ObservedValue>,
        #[serde(default)]
        returned: Option<ObservedValue>,
    },
    Exception {
        thread: u64,
        exception: ObservedValue,
    },
    FieldRead {
        thread: u64,
        owner: ObservedValue,
        field: String,
    },
}

/// Known result of invoking a constructor or factory live, used by dry runs
/// in place of a real probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeScript {
    /// Constructor or factory the script answers for.
    pub method: MethodId,
    #[serde(default)]
    pub produces: Option<ObservedValue>,
    #[serde(default)]
    pub throws: Option<String>,
}

/// A recorded trace as written by the agent: type catalog, scripted
/// construction results and the ordered event stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    #[serde(default)]
    pub types: Vec<TypeInfo>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    /// Types that must never be doubled.
    #[serde(default)]
    pub unmockable: Vec<String>,
    #[serde(default)]
    pub probes: Vec<ProbeScript>,
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

/// A sealed trace together with the catalog that describes it.
pub struct LoadedTrace {
    /// Types and methods described by the document.
    pub catalog: Arc<StaticTypeCatalog>,
    pub probe: ScriptedProbe,
    pub trace: ExecutionTrace,
    /// Counts reported when the trace was sealed.
    pub summary: SealSummary,
}

impl TraceDocument {
    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a document file.
    pub fn from_path(path: &Path) -> DomainResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DomainError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Catalog described by the document, with extra unmockable types.
    pub fn catalog(&self, extra_unmockable: &[String]) -> StaticTypeCatalog {
        let mut catalog = StaticTypeCatalog::new()
            .with_unmockable(self.unmockable.iter().chain(extra_unmockable).cloned());
        for info in &self.types {
            catalog.add_type(info.clone());
        }
        for method in &self.methods {
            catalog.add_method(method.clone());
        }
        catalog
    }

    /// Construction probe answering from the document's scripts.
    pub fn probe(&self) -> ScriptedProbe {
        self.probes
            .iter()
            .fold(ScriptedProbe::new(), |probe, script| {
                match (&script.produces, &script.throws) {
                    (Some(product), _) => probe.with_product(script.method, product.clone()),
                    (None, Some(exception)) => probe.with_exception(script.method, exception),
                    (None, None) => probe,
                }
            })
    }

    /// Replay the event log through a recorder and seal it.
    ///
    /// A record that breaks the trace model (a parameter count that does not
    /// match the method, a member call without a receiver, an unresolvable
    /// value) is logged and skipped together with the rest of its call, so
    /// it only costs the offending execution. A log that does not pair up
    /// starts with ends is corrupt and aborts the load.
    pub fn record(&self, catalog: Arc<StaticTypeCatalog>) -> DomainResult<(ExecutionTrace, SealSummary)> {
        let recorder = TraceRecorder::new(catalog);
        // Open document calls per thread, innermost last. `None` marks a
        // call whose start was skipped.
        let mut open: HashMap<u64, Vec<(u64, Option<ExecutionId>)>> = HashMap::new();
        let mut skipped = 0usize;

        for (index, event) in self.events.iter().enumerate() {
            let outcome = match event {
                TraceEvent::TestStarted { thread, name } => recorder.begin_test(name.clone(), *thread),
                TraceEvent::TestFinished { thread } => {
                    open.remove(thread);
                    recorder.end_test(*thread)
                }
                TraceEvent::CallStart {
                    thread,
                    call,
                    method,
                    receiver,
                    params,
                } => {
                    let started = recorder.record_call_start(*method, receiver.as_ref(), params, *thread);
                    let frames = open.entry(*thread).or_default();
                    match started {
                        Ok(id) => {
                            frames.push((*call, Some(id)));
                            Ok(())
                        }
                        Err(err) => {
                            frames.push((*call, None));
                            Err(err)
                        }
                    }
                }
                TraceEvent::CallEnd {
                    thread,
                    call,
                    receiver,
                    returned,
                } => {
                    let frames = open.entry(*thread).or_default();
                    let Some(position) = frames.iter().rposition(|(c, _)| c == call) else {
                        return Err(DomainError::TraceCorrupted(format!(
                            "event {index}: end of call {call} on thread {thread} without a start"
                        )));
                    };
                    match frames.remove(position).1 {
                        Some(id) => recorder
                            .record_call_end(id, receiver.as_ref(), returned.as_ref(), *thread)
                            .map(|_| ()),
                        None => {
                            debug!(index, thread, call, "end of a skipped call dropped");
                            Ok(())
                        }
                    }
                }
                TraceEvent::Exception { thread, exception } => {
                    match open.entry(*thread).or_default().pop() {
                        Some((call, None)) => {
                            debug!(index, thread, call, "exception of a skipped call dropped");
                            Ok(())
                        }
                        _ => recorder.record_exception(exception, *thread).map(|_| ()),
                    }
                }
                TraceEvent::FieldRead {
                    thread,
                    owner,
                    field,
                } => match open.get(thread).and_then(|frames| frames.last()) {
                    // The read belongs to a skipped call.
                    Some((_, None)) => Ok(()),
                    _ => recorder.record_field_read(owner, field.clone(), *thread),
                },
            };
            if let Err(err) = outcome {
                if !err.is_trace_integrity() {
                    return Err(err);
                }
                warn!(index, error = %err, "skipping malformed trace record");
                skipped += 1;
            }
        }
        debug!(
            unfinished = open.values().map(Vec::len).sum::<usize>(),
            "event log replayed"
        );
        let (trace, mut summary) = recorder.seal()?;
        summary.skipped = skipped;
        Ok((trace, summary))
    }

    /// Build the catalog and sealed trace in one step.
    pub fn load(&self, extra_unmockable: &[String]) -> DomainResult<LoadedTrace> {
        let catalog = Arc::new(self.catalog(extra_unmockable));
        let (trace, summary) = self.record(Arc::clone(&catalog))?;
        info!(
            types = catalog.type_count(),
            methods = catalog.method_count(),
            executions = summary.executions,
            skipped = summary.skipped,
            "trace document loaded"
        );
        Ok(LoadedTrace {
            catalog,
            probe: self.probe(),
            trace,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ConstructionProbe, ProbeOutcome};

    const DOCUMENT: &str = r#"{
        "types": [{ "name": "com.acme.MathUtil" }],
        "methods": [
            { "id": 1, "declaring_type": "com.acme.MathUtil", "name": "add",
              "param_types": ["int", "int"], "return_type": "int", "kind": "static" },
            { "id": 2, "declaring_type": "com.acme.MathUtil", "name": "check",
              "param_types": ["int"], "kind": "static" }
        ],
        "events": [
            { "event": "test_started", "thread": 1, "name": "testMath" },
            { "event": "call_start", "thread": 1, "call": 1, "method": 1,
              "params": [{ "kind": "primitive", "type": "int", "value": { "int": 2 } },
                         { "kind": "primitive", "type": "int", "value": { "int": 3 } }] },
            { "event": "call_end", "thread": 1, "call": 1,
              "returned": { "kind": "primitive", "type": "int", "value": { "int": 5 } } },
            { "event": "call_start", "thread": 1, "call": 2, "method": 2,
              "params": [{ "kind": "primitive", "type": "int", "value": { "int": -1 } }] },
            { "event": "exception", "thread": 1,
              "exception": { "kind": "object", "type": "java.lang.IllegalStateException", "snapshot": "" } },
            { "event": "call_start", "thread": 1, "call": 3, "method": 1,
              "params": [{ "kind": "primitive", "type": "int", "value": { "int": 2 } },
                         { "kind": "primitive", "type": "int", "value": { "int": 3 } }] },
            { "event": "call_end", "thread": 1, "call": 3,
              "returned": { "kind": "primitive", "type": "int", "value": { "int": 5 } } },
            { "event": "test_finished", "thread": 1 }
        ]
    }"#;

    #[test]
    fn test_document_replays_into_a_sealed_trace() {
        let document = TraceDocument::from_json(DOCUMENT).unwrap();
        let loaded = document.load(&[]).unwrap();
        // The second add(2, 3) collapses onto the first.
        assert_eq!(loaded.summary.executions, 2);
        assert_eq!(loaded.summary.incomplete, 0);
        let failing = loaded
            .trace
            .executions()
            .find(|e| e.method == MethodId(2))
            .unwrap();
        assert_eq!(failing.exception(), Some("java.lang.IllegalStateException"));
        assert_eq!(failing.test_name.as_deref(), Some("testMath"));
    }

    #[test]
    fn test_malformed_calls_are_skipped() {
        let mut document = TraceDocument::from_json(DOCUMENT).unwrap();
        let int = |v: i64| ObservedValue::int(v);
        document.events = vec![
            TraceEvent::TestStarted { thread: 1, name: "testMath".to_string() },
            // add(2) against a two-parameter add.
            TraceEvent::CallStart { thread: 1, call: 1, method: MethodId(1), receiver: None, params: vec![int(2)] },
            TraceEvent::CallStart { thread: 1, call: 2, method: MethodId(1), receiver: None, params: vec![int(2), int(3)] },
            TraceEvent::CallEnd { thread: 1, call: 2, receiver: None, returned: Some(int(5)) },
            // Ends the skipped add(2), not an enclosing call.
            TraceEvent::Exception {
                thread: 1,
                exception: ObservedValue::Object {
                    ty: "java.lang.ArithmeticException".to_string(),
                    identity: None,
                    snapshot: String::new(),
                    fields: std::collections::BTreeMap::new(),
                },
            },
            TraceEvent::CallStart { thread: 1, call: 3, method: MethodId(2), receiver: None, params: vec![] },
            TraceEvent::CallEnd { thread: 1, call: 3, receiver: None, returned: None },
            TraceEvent::CallStart { thread: 1, call: 4, method: MethodId(2), receiver: None, params: vec![int(-1)] },
            TraceEvent::CallEnd { thread: 1, call: 4, receiver: None, returned: None },
            TraceEvent::TestFinished { thread: 1 },
        ];

        let loaded = document.load(&[]).unwrap();
        assert_eq!(loaded.summary.skipped, 2);
        assert_eq!(loaded.summary.executions, 2);
        assert_eq!(loaded.summary.incomplete, 0);
        let add = loaded
            .trace
            .executions()
            .find(|e| e.method == MethodId(1))
            .unwrap();
        assert_eq!(add.params.len(), 2);
        assert!(!add.throws());
        assert!(loaded.trace.executions().all(|e| e.test_name.as_deref() == Some("testMath")));
    }

    #[test]
    fn test_end_without_start_is_corruption() {
        let document = TraceDocument {
            methods: vec![],
            events: vec![TraceEvent::CallEnd {
                thread: 1,
                call: 9,
                receiver: None,
                returned: None,
            }],
            ..TraceDocument::default()
        };
        let catalog = Arc::new(document.catalog(&[]));
        assert!(matches!(
            document.record(catalog),
            Err(DomainError::TraceCorrupted(_))
        ));
    }

    #[test]
    fn test_probe_scripts() {
        let document = TraceDocument {
            probes: vec![ProbeScript {
                method: MethodId(7),
                produces: None,
                throws: Some("java.io.IOException".to_string()),
            }],
            ..TraceDocument::default()
        };
        let method = MethodDescriptor {
            id: MethodId(7),
            declaring_type: "com.acme.Reader".to_string(),
            name: "open".to_string(),
            param_types: vec![],
            return_type: "com.acme.Reader".to_string(),
            access: crate::domain::models::AccessLevel::Public,
            kind: crate::domain::models::MethodKind::Static,
            synthetic: false,
        };
        assert_eq!(
            document.probe().invoke(&ExecutionTrace::new(), &method, &[]),
            ProbeOutcome::Threw("java.io.IOException".to_string())
        );
    }
}
