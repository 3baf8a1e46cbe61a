//! Common test utilities for integration tests
//!
//! Trace documents are written as JSON the way the instrumentation side
//! emits them, then loaded through the same path the CLI uses.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use replaygen::adapters::{LoadedTrace, TraceDocument};
use replaygen::domain::models::{ExecutionId, ExecutionTrace, GenerationConfig, MethodId};
use replaygen::services::ReconstructionAnalyzer;

pub fn int(v: i64) -> Value {
    json!({ "kind": "primitive", "type": "int", "value": { "int": v } })
}

pub fn boolean(v: bool) -> Value {
    json!({ "kind": "primitive", "type": "boolean", "value": { "bool": v } })
}

pub fn string(text: &str) -> Value {
    json!({ "kind": "string", "text": text })
}

pub fn object(ty: &str, identity: u64, snapshot: &str) -> Value {
    json!({ "kind": "object", "type": ty, "identity": identity, "snapshot": snapshot })
}

pub fn method(id: u32, owner: &str, name: &str, kind: &str, params: &[&str], ret: &str) -> Value {
    json!({
        "id": id,
        "declaring_type": owner,
        "name": name,
        "param_types": params,
        "return_type": ret,
        "kind": kind,
    })
}

pub fn private(mut method: Value) -> Value {
    method["access"] = json!("private");
    method
}

pub fn start(call: u64, method: u32, receiver: Option<Value>, params: Vec<Value>) -> Value {
    json!({
        "event": "call_start", "thread": 1, "call": call, "method": method,
        "receiver": receiver, "params": params,
    })
}

pub fn end(call: u64, receiver: Option<Value>, returned: Option<Value>) -> Value {
    json!({
        "event": "call_end", "thread": 1, "call": call,
        "receiver": receiver, "returned": returned,
    })
}

pub fn throw(exception: &str) -> Value {
    json!({ "event": "exception", "thread": 1, "exception": object(exception, 0, "") })
}

pub fn field_read(owner: Value, field: &str) -> Value {
    json!({ "event": "field_read", "thread": 1, "owner": owner, "field": field })
}

/// Document with a single test wrapping `events`.
pub fn document(types: Value, methods: Value, probes: Value, events: Vec<Value>) -> TraceDocument {
    let mut all = vec![json!({ "event": "test_started", "thread": 1, "name": "testRecorded" })];
    all.extend(events);
    all.push(json!({ "event": "test_finished", "thread": 1 }));
    let doc = json!({ "types": types, "methods": methods, "probes": probes, "events": all });
    serde_json::from_value(doc).expect("valid trace document")
}

pub fn load(document: &TraceDocument) -> LoadedTrace {
    document.load(&[]).expect("document loads")
}

pub fn analyzer(loaded: &LoadedTrace) -> ReconstructionAnalyzer {
    ReconstructionAnalyzer::new(
        loaded.catalog.clone(),
        Arc::new(loaded.probe.clone()),
        GenerationConfig::default(),
    )
}

/// First execution of `method`.
pub fn execution_of(trace: &ExecutionTrace, method: u32) -> ExecutionId {
    trace
        .executions()
        .find(|e| e.method == MethodId(method))
        .map(|e| e.id)
        .expect("method was recorded")
}

/// Static `MathUtil.add(2, 3) == 5`, plus a throwing `check(-1)`.
pub fn math_document() -> TraceDocument {
    document(
        json!([{ "name": "com.acme.MathUtil" }]),
        json!([
            method(1, "com.acme.MathUtil", "add", "static", &["int", "int"], "int"),
            method(2, "com.acme.MathUtil", "check", "static", &["int"], "void"),
        ]),
        json!([]),
        vec![
            start(1, 1, None, vec![int(2), int(3)]),
            end(1, None, Some(int(5))),
            start(2, 2, None, vec![int(-1)]),
            throw("java.lang.IllegalStateException"),
        ],
    )
}
