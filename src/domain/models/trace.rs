//! Execution trace store.
//!
//! An owned arena of recorded executions and values keyed by integer id, a
//! caller→callee graph with ordinal child positions, and def/use indices from
//! values to the executions that produce and consume them. The store is
//! append-only apart from write-once outcome fields and duplicate collapse,
//! which rewires every reference to the duplicate onto the surviving
//! execution.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult, TraceEntryKind};

use super::execution::{CallKey, MethodExecution, Outcome};
use super::method::MethodDescriptor;
use super::value::{Literal, ObservedEntry, ObservedValue, SnapshotRef, ValueKind, VarDetail};
use super::{ExecutionId, ValueId};

/// Interning key: two observations with equal keys share one value id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Null,
    Primitive(String, Literal),
    Str(String),
    Enum(String, String),
    Class(String),
    Mock(String),
    Reference {
        ty: String,
        identity: Option<u64>,
        fingerprint: String,
    },
}

/// Identities bound so far in one `intern` call, and the values it allocated.
#[derive(Default)]
struct InternScope {
    identities: HashMap<u64, ValueId>,
    fresh: Vec<(InternKey, ValueId)>,
}

/// The recorded graph of executions and values for one generation run.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    executions: BTreeMap<ExecutionId, MethodExecution>,
    values: BTreeMap<ValueId, VarDetail>,
    children: HashMap<ExecutionId, Vec<ExecutionId>>,
    parents: HashMap<ExecutionId, BTreeSet<ExecutionId>>,
    definitions: HashMap<ValueId, BTreeSet<ExecutionId>>,
    consumers: HashMap<ValueId, BTreeSet<ExecutionId>>,
    redirects: HashMap<ExecutionId, ExecutionId>,
    interned: HashMap<InternKey, ValueId>,
    canonical_calls: HashMap<(CallKey, Outcome), ExecutionId>,
    calls_by_key: HashMap<CallKey, BTreeSet<ExecutionId>>,
    signatures: HashMap<ExecutionId, (CallKey, Outcome)>,
    null_value: ValueId,
    next_value: u32,
    next_execution: u32,
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTrace {
    /// Empty store holding only the null value.
    pub fn new() -> Self {
        let null_value = ValueId(0);
        let mut values = BTreeMap::new();
        values.insert(null_value, VarDetail::new(null_value, ValueKind::Null));
        let mut interned = HashMap::new();
        interned.insert(InternKey::Null, null_value);
        Self {
            executions: BTreeMap::new(),
            values,
            children: HashMap::new(),
            parents: HashMap::new(),
            definitions: HashMap::new(),
            consumers: HashMap::new(),
            redirects: HashMap::new(),
            interned,
            canonical_calls: HashMap::new(),
            calls_by_key: HashMap::new(),
            signatures: HashMap::new(),
            null_value,
            next_value: 1,
            next_execution: 0,
        }
    }

    /// Drop every execution, value and index. The null value survives.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// The distinguished null value.
    pub fn null_value(&self) -> ValueId {
        self.null_value
    }

    /// Number of surviving executions.
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    /// Number of recorded values, null included.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Surviving executions in id order.
    pub fn executions(&self) -> impl Iterator<Item = &MethodExecution> {
        self.executions.values()
    }

    /// Ids of the surviving executions in order.
    pub fn execution_ids(&self) -> Vec<ExecutionId> {
        self.executions.keys().copied().collect()
    }

    /// Follow duplicate redirects to the surviving execution.
    pub fn canonical(&self, id: ExecutionId) -> ExecutionId {
        let mut current = id;
        while let Some(next) = self.redirects.get(&current) {
            current = *next;
        }
        current
    }

    /// Look up an execution, following duplicate redirects.
    pub fn execution(&self, id: ExecutionId) -> DomainResult<&MethodExecution> {
        let id = self.canonical(id);
        self.executions
            .get(&id)
            .ok_or_else(|| DomainError::missing_execution(id))
    }

    /// Mutable lookup, following duplicate redirects.
    pub fn execution_mut(&mut self, id: ExecutionId) -> DomainResult<&mut MethodExecution> {
        let id = self.canonical(id);
        self.executions
            .get_mut(&id)
            .ok_or_else(|| DomainError::missing_execution(id))
    }

    /// Look up a recorded value.
    pub fn value(&self, id: ValueId) -> DomainResult<&VarDetail> {
        self.values
            .get(&id)
            .ok_or_else(|| DomainError::missing_value(id))
    }

    /// Whether `id` names a recorded value.
    pub fn contains_value(&self, id: ValueId) -> bool {
        self.values.contains_key(&id)
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Intern an observed value tree and return its id. A tree that fails
    /// to intern leaves no trace: every value it allocated is dropped again.
    pub fn intern(&mut self, observed: &ObservedValue) -> DomainResult<ValueId> {
        let mut scope = InternScope::default();
        let result = self.intern_scoped(observed, &mut scope);
        if result.is_err() {
            for (key, id) in scope.fresh {
                self.interned.remove(&key);
                self.values.remove(&id);
            }
        }
        result
    }

    fn intern_scoped(
        &mut self,
        observed: &ObservedValue,
        scope: &mut InternScope,
    ) -> DomainResult<ValueId> {
        if let ObservedValue::BackRef { identity } = observed {
            return scope
                .identities
                .get(identity)
                .copied()
                .ok_or_else(|| DomainError::MissingTraceEntry {
                    kind: TraceEntryKind::Value,
                    id: format!("identity#{identity}"),
                });
        }

        let key = intern_key_for_observed(observed);
        if let Some(existing) = self.interned.get(&key) {
            if let Some(identity) = observed.identity() {
                scope.identities.insert(identity, *existing);
            }
            return Ok(*existing);
        }

        let id = self.allocate_value_id();
        self.interned.insert(key.clone(), id);
        scope.fresh.push((key, id));
        if let Some(identity) = observed.identity() {
            scope.identities.insert(identity, id);
        }

        let kind = self.build_kind(observed, scope)?;
        self.values.insert(id, VarDetail::new(id, kind));
        Ok(id)
    }

    fn build_kind(
        &mut self,
        observed: &ObservedValue,
        scope: &mut InternScope,
    ) -> DomainResult<ValueKind> {
        let kind = match observed {
            ObservedValue::Null => ValueKind::Null,
            ObservedValue::Primitive { ty, value } => ValueKind::Primitive {
                ty: ty.clone(),
                literal: *value,
            },
            ObservedValue::String { text } => ValueKind::Str { text: text.clone() },
            ObservedValue::StringBuffer { ty, text, .. } => {
                let source = self.intern_scoped(&ObservedValue::string(text.clone()), scope)?;
                ValueKind::StringBuffer {
                    ty: ty.clone(),
                    text: text.clone(),
                    source,
                }
            }
            ObservedValue::Enum { ty, name } => ValueKind::EnumConstant {
                ty: ty.clone(),
                name: name.clone(),
            },
            ObservedValue::Class { name } => ValueKind::ClassLiteral { name: name.clone() },
            ObservedValue::Sequence { ty, components, .. } => {
                let mut ids = Vec::with_capacity(components.len());
                for component in components {
                    ids.push(self.intern_scoped(component, scope)?);
                }
                ValueKind::Sequence {
                    ty: ty.clone(),
                    components: ids,
                }
            }
            ObservedValue::Map { ty, entries, .. } => {
                let mut ids = Vec::with_capacity(entries.len());
                for ObservedEntry { key, value } in entries {
                    let k = self.intern_scoped(key, scope)?;
                    let v = self.intern_scoped(value, scope)?;
                    ids.push((k, v));
                }
                ValueKind::Map {
                    ty: ty.clone(),
                    entries: ids,
                }
            }
            ObservedValue::Object {
                ty,
                snapshot,
                fields,
                ..
            } => {
                let mut ids = BTreeMap::new();
                for (name, field) in fields {
                    ids.insert(name.clone(), self.intern_scoped(field, scope)?);
                }
                ValueKind::Object {
                    ty: ty.clone(),
                    snapshot: SnapshotRef(snapshot.clone()),
                    fields: ids,
                }
            }
            ObservedValue::BackRef { identity } => {
                return Err(DomainError::MissingTraceEntry {
                    kind: TraceEntryKind::Value,
                    id: format!("identity#{identity}"),
                })
            }
        };
        Ok(kind)
    }

    /// Record an already-built value, sharing the id of an equal one.
    pub fn record_value(&mut self, kind: ValueKind) -> DomainResult<ValueId> {
        for child in kind.children() {
            if !self.values.contains_key(&child) {
                return Err(DomainError::missing_value(child));
            }
        }
        if kind.is_null() {
            return Ok(self.null_value);
        }
        let key = self.intern_key_for_kind(&kind);
        if let Some(existing) = self.interned.get(&key) {
            return Ok(*existing);
        }
        let id = self.allocate_value_id();
        self.interned.insert(key, id);
        self.values.insert(id, VarDetail::new(id, kind));
        Ok(id)
    }

    fn allocate_value_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn intern_key_for_kind(&self, kind: &ValueKind) -> InternKey {
        match kind {
            ValueKind::Null => InternKey::Null,
            ValueKind::Primitive { ty, literal } => InternKey::Primitive(ty.clone(), *literal),
            ValueKind::Str { text } => InternKey::Str(text.clone()),
            ValueKind::EnumConstant { ty, name } => InternKey::Enum(ty.clone(), name.clone()),
            ValueKind::ClassLiteral { name } => InternKey::Class(name.clone()),
            ValueKind::Mock { ty } => InternKey::Mock(ty.clone()),
            ValueKind::Object { ty, snapshot, .. } => InternKey::Reference {
                ty: ty.clone(),
                identity: None,
                fingerprint: format!("{ty}@{}", snapshot.0),
            },
            ValueKind::StringBuffer { ty, text, .. } => InternKey::Reference {
                ty: ty.clone(),
                identity: None,
                fingerprint: format!("{ty}<{}:{text}>", text.len()),
            },
            ValueKind::Sequence { ty, components } => InternKey::Reference {
                ty: ty.clone(),
                identity: None,
                fingerprint: format!("{ty}#{components:?}"),
            },
            ValueKind::Map { ty, entries } => InternKey::Reference {
                ty: ty.clone(),
                identity: None,
                fingerprint: format!("{ty}#{entries:?}"),
            },
        }
    }

    /// Every value reachable from `root`, including itself, in discovery order.
    pub fn reachable_values(&self, root: ValueId) -> DomainResult<Vec<ValueId>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            let detail = self.value(id)?;
            for child in detail.kind.children().into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push(child);
                }
            }
        }
        Ok(order)
    }

    /// Content equality of two recorded values (constants by content,
    /// containers by type and children, objects by snapshot).
    pub fn values_equal(&self, a: ValueId, b: ValueId) -> bool {
        let mut visited = HashSet::new();
        self.values_equal_inner(a, b, &mut visited)
    }

    fn values_equal_inner(
        &self,
        a: ValueId,
        b: ValueId,
        visited: &mut HashSet<(ValueId, ValueId)>,
    ) -> bool {
        if a == b || !visited.insert((a, b)) {
            return true;
        }
        let (Ok(left), Ok(right)) = (self.value(a), self.value(b)) else {
            return false;
        };
        match (&left.kind, &right.kind) {
            (ValueKind::Null, ValueKind::Null) => true,
            (
                ValueKind::Primitive { literal: x, .. },
                ValueKind::Primitive { literal: y, .. },
            ) => x == y,
            (ValueKind::Str { text: x }, ValueKind::Str { text: y }) => x == y,
            (
                ValueKind::StringBuffer { ty: tx, text: x, .. },
                ValueKind::StringBuffer { ty: ty_, text: y, .. },
            ) => tx == ty_ && x == y,
            (
                ValueKind::EnumConstant { ty: tx, name: x },
                ValueKind::EnumConstant { ty: ty_, name: y },
            ) => tx == ty_ && x == y,
            (ValueKind::ClassLiteral { name: x }, ValueKind::ClassLiteral { name: y }) => x == y,
            (
                ValueKind::Sequence {
                    ty: tx,
                    components: x,
                },
                ValueKind::Sequence {
                    ty: ty_,
                    components: y,
                },
            ) => {
                tx == ty_
                    && x.len() == y.len()
                    && x.iter()
                        .zip(y)
                        .all(|(p, q)| self.values_equal_inner(*p, *q, visited))
            }
            (ValueKind::Map { ty: tx, entries: x }, ValueKind::Map { ty: ty_, entries: y }) => {
                tx == ty_
                    && x.len() == y.len()
                    && x.iter().all(|(kx, vx)| {
                        y.iter().any(|(ky, vy)| {
                            self.values_equal_inner(*kx, *ky, visited)
                                && self.values_equal_inner(*vx, *vy, visited)
                        })
                    })
            }
            (
                ValueKind::Object {
                    ty: tx,
                    snapshot: x,
                    ..
                },
                ValueKind::Object {
                    ty: ty_,
                    snapshot: y,
                    ..
                },
            ) => tx == ty_ && x == y,
            (ValueKind::Mock { ty: x }, ValueKind::Mock { ty: y }) => x == y,
            _ => false,
        }
    }

    /// Content key of a recorded value. Objects are keyed by type and
    /// snapshot, containers by type and the keys of their children, and
    /// content-interned constants by id. A value already on the current path
    /// is keyed by its distance up the path, so cyclic graphs terminate.
    /// Values with equal keys are equal under [`Self::values_equal`].
    pub fn content_key(&self, id: ValueId) -> DomainResult<String> {
        let mut key = String::new();
        self.write_content_key(id, &mut Vec::new(), &mut key)?;
        Ok(key)
    }

    fn write_content_key(
        &self,
        id: ValueId,
        path: &mut Vec<ValueId>,
        out: &mut String,
    ) -> DomainResult<()> {
        if let Some(depth) = path.iter().rposition(|v| *v == id) {
            out.push_str(&format!("^{}", path.len() - depth));
            return Ok(());
        }
        match &self.value(id)?.kind {
            ValueKind::Object { ty, snapshot, .. } => {
                out.push_str(&format!("{ty:?}@{:?}", snapshot.0));
            }
            ValueKind::StringBuffer { ty, text, .. } => {
                out.push_str(&format!("{ty:?}<{text:?}>"));
            }
            ValueKind::Sequence { ty, components } => {
                path.push(id);
                out.push_str(&format!("{ty:?}["));
                for (index, component) in components.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    self.write_content_key(*component, path, out)?;
                }
                out.push(']');
                path.pop();
            }
            ValueKind::Map { ty, entries } => {
                path.push(id);
                let mut keyed = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let mut entry = String::new();
                    self.write_content_key(*k, path, &mut entry)?;
                    entry.push_str("=>");
                    self.write_content_key(*v, path, &mut entry)?;
                    keyed.push(entry);
                }
                path.pop();
                // Map equality ignores entry order.
                keyed.sort();
                out.push_str(&format!("{ty:?}{{{}}}", keyed.join(",")));
            }
            _ => out.push_str(&format!("#{id}")),
        }
        Ok(())
    }

    /// Method and input content of a recorded call.
    pub fn call_key(&self, execution: &MethodExecution) -> DomainResult<CallKey> {
        let receiver = execution
            .receiver
            .map(|value| self.content_key(value))
            .transpose()?;
        let params = execution
            .params
            .iter()
            .map(|value| self.content_key(*value))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(CallKey {
            method: execution.method,
            receiver,
            params,
        })
    }

    /// Content of a recorded call's result.
    pub fn outcome(&self, execution: &MethodExecution) -> DomainResult<Outcome> {
        let key = |value: Option<ValueId>| value.map(|v| self.content_key(v)).transpose();
        Ok(Outcome {
            return_value: key(execution.return_value())?,
            result_this: key(execution.result_this())?,
            exception: execution.exception().map(str::to_string),
        })
    }

    /// Owned tree form of a recorded value. Values already on the current
    /// path are emitted as back references, so cyclic graphs terminate.
    pub fn to_observed(&self, id: ValueId) -> DomainResult<ObservedValue> {
        let mut path = HashSet::new();
        self.to_observed_inner(id, &mut path)
    }

    fn to_observed_inner(
        &self,
        id: ValueId,
        path: &mut HashSet<ValueId>,
    ) -> DomainResult<ObservedValue> {
        if path.contains(&id) {
            return Ok(ObservedValue::BackRef {
                identity: u64::from(id.0),
            });
        }
        let detail = self.value(id)?;
        path.insert(id);
        let identity = Some(u64::from(id.0));
        let observed = match &detail.kind {
            ValueKind::Null => ObservedValue::Null,
            ValueKind::Primitive { ty, literal } => ObservedValue::Primitive {
                ty: ty.clone(),
                value: *literal,
            },
            ValueKind::Str { text } => ObservedValue::String { text: text.clone() },
            ValueKind::StringBuffer { ty, text, .. } => ObservedValue::StringBuffer {
                ty: ty.clone(),
                text: text.clone(),
                identity,
            },
            ValueKind::EnumConstant { ty, name } => ObservedValue::Enum {
                ty: ty.clone(),
                name: name.clone(),
            },
            ValueKind::ClassLiteral { name } => ObservedValue::Class { name: name.clone() },
            ValueKind::Sequence { ty, components } => {
                let mut items = Vec::with_capacity(components.len());
                for component in components {
                    items.push(self.to_observed_inner(*component, path)?);
                }
                ObservedValue::Sequence {
                    ty: ty.clone(),
                    identity,
                    components: items,
                }
            }
            ValueKind::Map { ty, entries } => {
                let mut items = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    items.push(ObservedEntry {
                        key: self.to_observed_inner(*k, path)?,
                        value: self.to_observed_inner(*v, path)?,
                    });
                }
                ObservedValue::Map {
                    ty: ty.clone(),
                    identity,
                    entries: items,
                }
            }
            ValueKind::Object {
                ty,
                snapshot,
                fields,
            } => {
                let mut items = BTreeMap::new();
                for (name, field) in fields {
                    items.insert(name.clone(), self.to_observed_inner(*field, path)?);
                }
                ObservedValue::Object {
                    ty: ty.clone(),
                    identity,
                    snapshot: snapshot.0.clone(),
                    fields: items,
                }
            }
            ValueKind::Mock { ty } => ObservedValue::Object {
                ty: ty.clone(),
                identity,
                snapshot: format!("mock:{ty}"),
                fields: BTreeMap::new(),
            },
        };
        path.remove(&id);
        Ok(observed)
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Record a call start. Validates the parameter count and the receiver
    /// invariants against the method descriptor.
    pub fn record_execution(
        &mut self,
        method: &MethodDescriptor,
        receiver: Option<ValueId>,
        params: Vec<ValueId>,
        test_name: Option<String>,
    ) -> DomainResult<ExecutionId> {
        if params.len() != method.param_types.len() {
            return Err(DomainError::ParameterCountMismatch {
                method: method.id,
                expected: method.param_types.len(),
                actual: params.len(),
            });
        }
        match (method.kind.has_receiver(), receiver) {
            (true, None) => return Err(DomainError::MissingReceiver(method.id)),
            (true, Some(r)) if r == self.null_value => {
                return Err(DomainError::MissingReceiver(method.id))
            }
            (false, Some(_)) => return Err(DomainError::UnexpectedReceiver(method.id)),
            _ => {}
        }
        for value in receiver.iter().chain(params.iter()) {
            if !self.values.contains_key(value) {
                return Err(DomainError::missing_value(*value));
            }
        }

        let id = ExecutionId(self.next_execution);
        self.next_execution += 1;
        let execution = MethodExecution::new(id, method.id, receiver, params, test_name);
        for input in execution.inputs() {
            self.consumers.entry(input).or_default().insert(id);
        }
        self.executions.insert(id, execution);
        Ok(id)
    }

    /// Record a normal call end. `result_this` is only meaningful for member
    /// calls and constructors.
    pub fn complete_execution(
        &mut self,
        id: ExecutionId,
        return_value: Option<ValueId>,
        result_this: Option<ValueId>,
    ) -> DomainResult<()> {
        for value in return_value.iter().chain(result_this.iter()) {
            if !self.values.contains_key(value) {
                return Err(DomainError::missing_value(*value));
            }
        }
        let execution = self.execution_mut(id)?;
        let id = execution.id;
        if let Some(value) = return_value {
            execution.set_return_value(value)?;
        }
        if let Some(value) = result_this {
            execution.set_result_this(value)?;
        }
        execution.mark_completed();
        for value in return_value.into_iter().chain(result_this) {
            self.definitions.entry(value).or_default().insert(id);
        }
        self.index_outcome(id)
    }

    /// Record an exceptional call end.
    pub fn fail_execution(&mut self, id: ExecutionId, exception_type: &str) -> DomainResult<()> {
        let execution = self.execution_mut(id)?;
        let id = execution.id;
        execution.set_exception(exception_type)?;
        execution.mark_completed();
        self.index_outcome(id)
    }

    /// Index an observed call by content. Synthetic executions stay out of
    /// the duplicate and determinism indices.
    fn index_outcome(&mut self, id: ExecutionId) -> DomainResult<()> {
        let execution = self.execution(id)?;
        if execution.synthetic {
            return Ok(());
        }
        let id = execution.id;
        let key = self.call_key(execution)?;
        let outcome = self.outcome(execution)?;
        self.calls_by_key.entry(key.clone()).or_default().insert(id);
        self.canonical_calls
            .entry((key.clone(), outcome.clone()))
            .or_insert(id);
        self.signatures.insert(id, (key, outcome));
        Ok(())
    }

    /// Attach `child` under `parent` at the given ordinal position.
    pub fn add_child_edge(
        &mut self,
        parent: ExecutionId,
        child: ExecutionId,
        ordinal: usize,
    ) -> DomainResult<()> {
        let parent = self.canonical(parent);
        let child = self.canonical(child);
        if !self.executions.contains_key(&parent) {
            return Err(DomainError::missing_execution(parent));
        }
        if !self.executions.contains_key(&child) {
            return Err(DomainError::missing_execution(child));
        }
        let list = self.children.entry(parent).or_default();
        if !list.contains(&child) {
            let at = ordinal.min(list.len());
            list.insert(at, child);
        }
        self.parents.entry(child).or_default().insert(parent);
        Ok(())
    }

    /// Callees of `id` in call order.
    pub fn children(&self, id: ExecutionId) -> &[ExecutionId] {
        self.children
            .get(&self.canonical(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Callers of `id`.
    pub fn parents(&self, id: ExecutionId) -> Vec<ExecutionId> {
        self.parents
            .get(&self.canonical(id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Executions that produced `value` (as return value or receiver state).
    pub fn defining_executions(&self, value: ValueId) -> DomainResult<Vec<ExecutionId>> {
        if !self.values.contains_key(&value) {
            return Err(DomainError::missing_value(value));
        }
        Ok(self
            .definitions
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Executions that consumed `value` as receiver or parameter.
    pub fn consumers(&self, value: ValueId) -> DomainResult<Vec<ExecutionId>> {
        if !self.values.contains_key(&value) {
            return Err(DomainError::missing_value(value));
        }
        Ok(self
            .consumers
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    /// First observed execution equal to `id` in method, receiver,
    /// parameters and outcome by content, if it is a different execution.
    pub fn find_equivalent(&self, id: ExecutionId) -> DomainResult<Option<ExecutionId>> {
        let execution = self.execution(id)?;
        let Some(signature) = self.signatures.get(&execution.id) else {
            return Ok(None);
        };
        let canonical = self.canonical_calls.get(signature).copied();
        Ok(canonical.filter(|c| *c != execution.id))
    }

    /// Whether another observed execution of the same call produced a
    /// different outcome.
    pub fn has_divergent_outcomes(&self, id: ExecutionId) -> DomainResult<bool> {
        let execution = self.execution(id)?;
        let Some((key, outcome)) = self.signatures.get(&execution.id) else {
            return Ok(false);
        };
        let Some(peers) = self.calls_by_key.get(key) else {
            return Ok(false);
        };
        Ok(peers
            .iter()
            .filter(|peer| **peer != execution.id)
            .filter_map(|peer| self.signatures.get(peer))
            .any(|(_, other)| other != outcome))
    }

    /// Fold `duplicate` into `canonical`: every graph edge and def/use entry
    /// that referenced the duplicate is rewired onto the canonical execution,
    /// and later lookups of the duplicate id are redirected.
    pub fn collapse_duplicate(
        &mut self,
        duplicate: ExecutionId,
        canonical: ExecutionId,
    ) -> DomainResult<()> {
        let canonical = self.canonical(canonical);
        if duplicate == canonical {
            return Ok(());
        }
        if !self.executions.contains_key(&canonical) {
            return Err(DomainError::missing_execution(canonical));
        }
        let removed = self
            .executions
            .remove(&duplicate)
            .ok_or_else(|| DomainError::missing_execution(duplicate))?;

        // Callers of the duplicate now call the canonical execution.
        for parent in self.parents.remove(&duplicate).unwrap_or_default() {
            if let Some(list) = self.children.get_mut(&parent) {
                if list.contains(&canonical) {
                    list.retain(|c| *c != duplicate);
                } else {
                    for slot in list.iter_mut().filter(|c| **c == duplicate) {
                        *slot = canonical;
                    }
                }
            }
            self.parents.entry(canonical).or_default().insert(parent);
        }

        // Callees of the duplicate are merged under the canonical execution.
        for child in self.children.remove(&duplicate).unwrap_or_default() {
            let list = self.children.entry(canonical).or_default();
            if !list.contains(&child) {
                list.push(child);
            }
            let child_parents = self.parents.entry(child).or_default();
            child_parents.remove(&duplicate);
            child_parents.insert(canonical);
        }

        // Def/use entries.
        for index in [&mut self.definitions, &mut self.consumers] {
            for set in index.values_mut() {
                if set.remove(&duplicate) {
                    set.insert(canonical);
                }
            }
        }

        // Outcome indices.
        if let Some((key, _)) = self.signatures.remove(&duplicate) {
            if let Some(peers) = self.calls_by_key.get_mut(&key) {
                peers.remove(&duplicate);
            }
        }
        self.canonical_calls.retain(|_, v| *v != duplicate);

        if let Some(target) = self.executions.get_mut(&canonical) {
            target.fields_read.extend(removed.fields_read);
            if target.test_name.is_none() {
                target.test_name = removed.test_name;
            }
        }
        self.redirects.insert(duplicate, canonical);
        Ok(())
    }

    /// Insert an execution produced by a construction probe. The execution is
    /// complete on arrival, owned by no test, and never compared against
    /// observed executions.
    pub fn record_synthetic_execution(
        &mut self,
        method: &MethodDescriptor,
        params: Vec<ValueId>,
        produced: ValueId,
    ) -> DomainResult<ExecutionId> {
        let id = self.record_execution(method, None, params, None)?;
        self.execution_mut(id)?.synthetic = true;
        if method.is_constructor() {
            self.complete_execution(id, None, Some(produced))?;
        } else {
            self.complete_execution(id, Some(produced), None)?;
        }
        Ok(id)
    }

    /// Mark executions whose end was never recorded as untestable. Returns
    /// how many were marked.
    pub fn mark_incomplete_untestable(&mut self) -> usize {
        let mut marked = 0;
        for execution in self.executions.values_mut() {
            if !execution.is_completed() && execution.can_test {
                execution.can_test = false;
                marked += 1;
            }
        }
        marked
    }

    /// Depth-first list of the call subtree under `root`, excluding `root`.
    pub fn descendants(&self, root: ExecutionId) -> Vec<ExecutionId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let root = self.canonical(root);
        visited.insert(root);
        let mut stack: Vec<ExecutionId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            for child in self.children(id).iter().rev() {
                if !visited.contains(child) {
                    stack.push(*child);
                }
            }
        }
        order
    }

    /// Check that every edge and index entry points at a live execution.
    pub fn verify_integrity(&self) -> DomainResult<()> {
        let live = |id: &ExecutionId| self.executions.contains_key(id);
        for (parent, list) in &self.children {
            if !live(parent) || !list.iter().all(live) {
                return Err(DomainError::TraceCorrupted(format!(
                    "dangling call edge under {parent}"
                )));
            }
        }
        for (child, set) in &self.parents {
            if !live(child) || !set.iter().all(live) {
                return Err(DomainError::TraceCorrupted(format!(
                    "dangling caller entry for {child}"
                )));
            }
        }
        for (value, set) in self.definitions.iter().chain(self.consumers.iter()) {
            if !set.iter().all(live) {
                return Err(DomainError::TraceCorrupted(format!(
                    "def/use entry of {value} references a removed execution"
                )));
            }
        }
        Ok(())
    }
}

fn intern_key_for_observed(observed: &ObservedValue) -> InternKey {
    match observed {
        ObservedValue::Null | ObservedValue::BackRef { .. } => InternKey::Null,
        ObservedValue::Primitive { ty, value } => InternKey::Primitive(ty.clone(), *value),
        ObservedValue::String { text } => InternKey::Str(text.clone()),
        ObservedValue::Enum { ty, name } => InternKey::Enum(ty.clone(), name.clone()),
        ObservedValue::Class { name } => InternKey::Class(name.clone()),
        ObservedValue::StringBuffer { ty, identity, .. }
        | ObservedValue::Sequence { ty, identity, .. }
        | ObservedValue::Map { ty, identity, .. }
        | ObservedValue::Object { ty, identity, .. } => InternKey::Reference {
            ty: ty.clone(),
            identity: *identity,
            fingerprint: observed.fingerprint(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::method::{AccessLevel, MethodKind};
    use crate::domain::models::MethodId;

    fn static_method(id: u32, params: usize) -> MethodDescriptor {
        MethodDescriptor {
            id: MethodId(id),
            declaring_type: "com.acme.MathUtil".to_string(),
            name: format!("op{id}"),
            param_types: vec!["int".to_string(); params],
            return_type: "int".to_string(),
            access: AccessLevel::Public,
            kind: MethodKind::Static,
            synthetic: false,
        }
    }

    #[test]
    fn test_primitives_and_strings_are_interned_by_content() {
        let mut trace = ExecutionTrace::new();
        let a = trace.intern(&ObservedValue::int(5)).unwrap();
        let b = trace.intern(&ObservedValue::int(5)).unwrap();
        let c = trace.intern(&ObservedValue::string("5")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(trace.intern(&ObservedValue::Null).unwrap(), trace.null_value());
    }

    #[test]
    fn test_objects_with_same_identity_and_state_share_an_id() {
        let mut trace = ExecutionTrace::new();
        let object = |snapshot: &str| ObservedValue::Object {
            ty: "com.acme.Counter".to_string(),
            identity: Some(42),
            snapshot: snapshot.to_string(),
            fields: BTreeMap::new(),
        };
        let first = trace.intern(&object("count=0")).unwrap();
        let again = trace.intern(&object("count=0")).unwrap();
        let mutated = trace.intern(&object("count=1")).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, mutated);
    }

    #[test]
    fn test_self_referencing_sequence_interns_once() {
        let mut trace = ExecutionTrace::new();
        let looped = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(1),
            components: vec![ObservedValue::BackRef { identity: 1 }],
        };
        let id = trace.intern(&looped).unwrap();
        let detail = trace.value(id).unwrap();
        match &detail.kind {
            ValueKind::Sequence { components, .. } => assert_eq!(components, &vec![id]),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(trace.reachable_values(id).unwrap(), vec![id]);
        let observed = trace.to_observed(id).unwrap();
        assert!(observed.matches(&looped, 0.0));
    }

    #[test]
    fn test_parameter_count_mismatch_is_rejected() {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let err = trace
            .record_execution(&static_method(1, 2), None, vec![two], None)
            .unwrap_err();
        assert!(matches!(err, DomainError::ParameterCountMismatch { .. }));
    }

    #[test]
    fn test_static_call_with_receiver_is_rejected() {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let err = trace
            .record_execution(&static_method(1, 0), Some(two), vec![], None)
            .unwrap_err();
        assert!(matches!(err, DomainError::UnexpectedReceiver(_)));
    }

    #[test]
    fn test_def_use_indices() {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let four = trace.intern(&ObservedValue::int(4)).unwrap();
        let exec = trace
            .record_execution(&static_method(1, 1), None, vec![two], None)
            .unwrap();
        trace.complete_execution(exec, Some(four), None).unwrap();
        assert_eq!(trace.defining_executions(four).unwrap(), vec![exec]);
        assert_eq!(trace.consumers(two).unwrap(), vec![exec]);
        assert!(trace.defining_executions(two).unwrap().is_empty());
        assert!(matches!(
            trace.consumers(ValueId(999)),
            Err(DomainError::MissingTraceEntry { .. })
        ));
    }

    #[test]
    fn test_collapse_duplicate_rewires_edges() {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let four = trace.intern(&ObservedValue::int(4)).unwrap();
        let outer = static_method(1, 0);
        let inner = static_method(2, 1);

        let p1 = trace.record_execution(&outer, None, vec![], None).unwrap();
        let c1 = trace.record_execution(&inner, None, vec![two], None).unwrap();
        trace.add_child_edge(p1, c1, 0).unwrap();
        trace.complete_execution(c1, Some(four), None).unwrap();

        let p2 = trace.record_execution(&static_method(3, 0), None, vec![], None).unwrap();
        let c2 = trace.record_execution(&inner, None, vec![two], None).unwrap();
        trace.add_child_edge(p2, c2, 0).unwrap();
        trace.complete_execution(c2, Some(four), None).unwrap();

        assert_eq!(trace.find_equivalent(c2).unwrap(), Some(c1));
        trace.collapse_duplicate(c2, c1).unwrap();

        assert_eq!(trace.children(p2), &[c1]);
        assert_eq!(trace.parents(c1), vec![p1, p2]);
        assert_eq!(trace.canonical(c2), c1);
        assert_eq!(trace.consumers(two).unwrap(), vec![c1]);
        assert_eq!(trace.defining_executions(four).unwrap(), vec![c1]);
        assert!(trace.execution(c2).is_ok());
        trace.verify_integrity().unwrap();
    }

    #[test]
    fn test_divergent_outcomes_are_detected() {
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let four = trace.intern(&ObservedValue::int(4)).unwrap();
        let five = trace.intern(&ObservedValue::int(5)).unwrap();
        let method = static_method(1, 1);

        let a = trace.record_execution(&method, None, vec![two], None).unwrap();
        trace.complete_execution(a, Some(four), None).unwrap();
        assert!(!trace.has_divergent_outcomes(a).unwrap());

        let b = trace.record_execution(&method, None, vec![two], None).unwrap();
        trace.complete_execution(b, Some(five), None).unwrap();
        assert!(trace.has_divergent_outcomes(a).unwrap());
        assert!(trace.has_divergent_outcomes(b).unwrap());
    }

    #[test]
    fn test_values_equal_compares_content() {
        let mut trace = ExecutionTrace::new();
        let seq = |identity| ObservedValue::Sequence {
            ty: "int[]".to_string(),
            identity: Some(identity),
            components: vec![ObservedValue::int(1), ObservedValue::int(2)],
        };
        let a = trace.intern(&seq(1)).unwrap();
        let b = trace.intern(&seq(2)).unwrap();
        assert_ne!(a, b);
        assert!(trace.values_equal(a, b));
    }

    fn point(identity: u64) -> ObservedValue {
        ObservedValue::Object {
            ty: "com.acme.Point".to_string(),
            identity: Some(identity),
            snapshot: "x=1;y=2".to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_equal_snapshots_make_the_same_call() {
        let mut trace = ExecutionTrace::new();
        let first = trace.intern(&point(1)).unwrap();
        let second = trace.intern(&point(2)).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            trace.content_key(first).unwrap(),
            trace.content_key(second).unwrap()
        );

        let one = trace.intern(&ObservedValue::int(1)).unwrap();
        let norm = static_method(1, 1);
        let a = trace.record_execution(&norm, None, vec![first], None).unwrap();
        trace.complete_execution(a, Some(one), None).unwrap();
        let b = trace.record_execution(&norm, None, vec![second], None).unwrap();
        trace.complete_execution(b, Some(one), None).unwrap();
        assert_eq!(trace.find_equivalent(b).unwrap(), Some(a));

        let ctor = MethodDescriptor {
            name: "<init>".to_string(),
            return_type: "void".to_string(),
            kind: MethodKind::Constructor,
            ..static_method(2, 0)
        };
        let c1 = trace.record_execution(&ctor, None, vec![], None).unwrap();
        trace.complete_execution(c1, None, Some(first)).unwrap();
        let c2 = trace.record_execution(&ctor, None, vec![], None).unwrap();
        trace.complete_execution(c2, None, Some(second)).unwrap();
        assert!(!trace.has_divergent_outcomes(c1).unwrap());
        assert!(!trace.has_divergent_outcomes(c2).unwrap());
        assert_eq!(trace.find_equivalent(c2).unwrap(), Some(c1));
    }

    #[test]
    fn test_map_content_key_ignores_entry_order() {
        let mut trace = ExecutionTrace::new();
        let map = |identity, entries: Vec<(i64, i64)>| ObservedValue::Map {
            ty: "java.util.HashMap".to_string(),
            identity: Some(identity),
            entries: entries
                .into_iter()
                .map(|(k, v)| ObservedEntry {
                    key: ObservedValue::int(k),
                    value: ObservedValue::int(v),
                })
                .collect(),
        };
        let a = trace.intern(&map(1, vec![(1, 2), (3, 4)])).unwrap();
        let b = trace.intern(&map(2, vec![(3, 4), (1, 2)])).unwrap();
        let c = trace.intern(&map(3, vec![(1, 2), (3, 5)])).unwrap();
        assert_eq!(trace.content_key(a).unwrap(), trace.content_key(b).unwrap());
        assert_ne!(trace.content_key(a).unwrap(), trace.content_key(c).unwrap());
    }

    #[test]
    fn test_synthetic_executions_are_not_compared_with_observed_ones() {
        let mut trace = ExecutionTrace::new();
        let five = trace.intern(&ObservedValue::int(5)).unwrap();
        let method = static_method(1, 0);
        let observed = trace.record_execution(&method, None, vec![], None).unwrap();
        trace
            .fail_execution(observed, "java.lang.IllegalStateException")
            .unwrap();

        let synthetic = trace.record_synthetic_execution(&method, vec![], five).unwrap();
        assert!(trace.execution(synthetic).unwrap().synthetic);
        assert!(!trace.has_divergent_outcomes(observed).unwrap());
        assert!(!trace.has_divergent_outcomes(synthetic).unwrap());
        assert_eq!(trace.find_equivalent(synthetic).unwrap(), None);
        assert_eq!(trace.defining_executions(five).unwrap(), vec![synthetic]);
    }

    #[test]
    fn test_failed_intern_leaves_no_values_behind() {
        let mut trace = ExecutionTrace::new();
        let inner = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(2),
            components: vec![ObservedValue::BackRef { identity: 1 }],
        };
        let broken = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(1),
            components: vec![inner.clone(), ObservedValue::BackRef { identity: 99 }],
        };
        let before = trace.value_count();
        assert!(matches!(
            trace.intern(&broken),
            Err(DomainError::MissingTraceEntry { .. })
        ));
        assert_eq!(trace.value_count(), before);

        let valid = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(1),
            components: vec![inner],
        };
        let id = trace.intern(&valid).unwrap();
        let reachable = trace.reachable_values(id).unwrap();
        assert_eq!(reachable.len(), 2);
        assert_eq!(trace.value_count(), before + 2);
    }

    #[test]
    fn test_incomplete_executions_become_untestable() {
        let mut trace = ExecutionTrace::new();
        let exec = trace
            .record_execution(&static_method(1, 0), None, vec![], None)
            .unwrap();
        assert_eq!(trace.mark_incomplete_untestable(), 1);
        assert!(!trace.execution(exec).unwrap().can_test);
    }
}
