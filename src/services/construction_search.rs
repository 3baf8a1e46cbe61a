//! Construction search.
//!
//! Finds one execution usable as the "default" constructing call of a type.
//! Results are memoized per type for the run. Types already being searched
//! short-circuit to "not found", which breaks mutual-construction loops; a
//! negative result reached through such a short circuit is not cached, since
//! it may succeed once the outer search finishes.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::method::{array_dimensions, is_primitive_type, is_wrapper_type};
use crate::domain::models::value::STRING_TYPE;
use crate::domain::models::{
    AccessLevel, ExecutionId, ExecutionTrace, Literal, MethodDescriptor, MethodKind, ValueId,
    ValueKind,
};
use crate::domain::ports::{ConstructionProbe, ProbeOutcome, TypeCatalog};

/// Ranked constructing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    execution: ExecutionId,
    access_rank: u8,
    object_params: usize,
    params: usize,
}

impl Candidate {
    /// Compare object-parameter fractions exactly by cross multiplication.
    fn fraction_cmp(&self, other: &Self) -> Ordering {
        let lhs = self.object_params * other.params.max(1);
        let rhs = other.object_params * self.params.max(1);
        lhs.cmp(&rhs)
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.access_rank
            .cmp(&other.access_rank)
            .then_with(|| self.fraction_cmp(other))
            .then_with(|| self.execution.cmp(&other.execution))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_object_type(type_name: &str) -> bool {
    !(is_primitive_type(type_name) || is_wrapper_type(type_name) || type_name == STRING_TYPE)
}

/// Collaborators the search needs besides the trace.
pub struct SearchContext<'a> {
    pub catalog: &'a dyn TypeCatalog,
    pub probe: &'a dyn ConstructionProbe,
}

/// Memoized search for a way to construct a type.
#[derive(Debug, Default)]
pub struct ConstructionSearch {
    cache: HashMap<String, Option<ExecutionId>>,
    in_progress: HashSet<String>,
    guard_hits: usize,
}

impl ConstructionSearch {
    /// Search with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every memoized result. Called at the start of a run.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.in_progress.clear();
        self.guard_hits = 0;
    }

    /// Memoized result for a type, if it was searched already.
    pub fn cached(&self, type_name: &str) -> Option<Option<ExecutionId>> {
        self.cache.get(type_name).copied()
    }

    /// Find an execution that constructs exactly `type_name`, or `None` when
    /// the type cannot be constructed.
    pub fn find_constructor(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        type_name: &str,
    ) -> DomainResult<Option<ExecutionId>> {
        if let Some(hit) = self.cache.get(type_name) {
            return Ok(*hit);
        }
        if !self.in_progress.insert(type_name.to_string()) {
            self.guard_hits += 1;
            return Ok(None);
        }
        let hits_before = self.guard_hits;
        let result = self.search(trace, ctx, type_name);
        self.in_progress.remove(type_name);
        let found = result?;

        if found.is_some() || self.guard_hits == hits_before {
            self.cache.insert(type_name.to_string(), found);
        }
        match found {
            Some(execution) => debug!(type_name, %execution, "constructor found"),
            None => debug!(type_name, "no constructor available"),
        }
        Ok(found)
    }

    fn search(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        type_name: &str,
    ) -> DomainResult<Option<ExecutionId>> {
        self.reinvoke_incomplete(trace, ctx, type_name)?;
        if let Some(found) = self.best_candidate(trace, ctx, type_name)? {
            return Ok(Some(found));
        }

        let mut constructors: Vec<MethodDescriptor> = ctx
            .catalog
            .constructors_of(type_name)
            .into_iter()
            .filter(|m| m.access == AccessLevel::Public)
            .cloned()
            .collect();
        constructors.sort_by_key(|m| (m.param_types.len(), m.id));
        for constructor in &constructors {
            let Some(args) = self.default_arguments(trace, ctx, constructor)? else {
                continue;
            };
            if self.probe_and_record(trace, ctx, constructor, args, type_name)? {
                if let Some(found) = self.best_candidate(trace, ctx, type_name)? {
                    return Ok(Some(found));
                }
            }
        }

        let factories: Vec<MethodDescriptor> = ctx
            .catalog
            .static_factories_of(type_name)
            .into_iter()
            .filter(|m| m.access == AccessLevel::Public)
            .cloned()
            .collect();
        for factory in &factories {
            if self.probe_and_record(trace, ctx, factory, Vec::new(), type_name)? {
                if let Some(found) = self.best_candidate(trace, ctx, type_name)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Whether `method` constructs `type_name` without a receiver: one of its
    /// constructors, or a static no-argument factory returning it.
    fn constructs(method: &MethodDescriptor, type_name: &str) -> bool {
        match method.kind {
            MethodKind::Constructor => method.declaring_type == type_name,
            MethodKind::Static => method.param_types.is_empty() && method.return_type == type_name,
            MethodKind::Member | MethodKind::StaticInitializer => false,
        }
    }

    /// Re-run observed constructing calls whose end was never recorded, so
    /// their product becomes visible in the trace.
    fn reinvoke_incomplete(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        type_name: &str,
    ) -> DomainResult<()> {
        let pending: Vec<(MethodDescriptor, Vec<ValueId>)> = trace
            .executions()
            .filter(|e| !e.is_completed())
            .filter_map(|e| {
                ctx.catalog
                    .method(e.method)
                    .filter(|m| Self::constructs(m, type_name))
                    .map(|m| (m.clone(), e.params.clone()))
            })
            .collect();
        for (method, params) in pending {
            self.probe_and_record(trace, ctx, &method, params, type_name)?;
        }
        Ok(())
    }

    /// Run `method` through the probe and record what it produced. Returns
    /// whether an instance of exactly `type_name` was recorded.
    fn probe_and_record(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        method: &MethodDescriptor,
        args: Vec<ValueId>,
        type_name: &str,
    ) -> DomainResult<bool> {
        match ctx.probe.invoke(trace, method, &args) {
            ProbeOutcome::Produced(observed) if observed.ty() == type_name => {
                let produced = trace.intern(&observed)?;
                let execution = trace.record_synthetic_execution(method, args, produced)?;
                debug!(type_name, %execution, method = %method.signature(), "probe produced instance");
                Ok(true)
            }
            ProbeOutcome::Produced(observed) => {
                debug!(type_name, produced = observed.ty(), "probe produced a different type");
                Ok(false)
            }
            ProbeOutcome::Threw(exception) => {
                debug!(type_name, %exception, method = %method.signature(), "probe threw");
                Ok(false)
            }
            ProbeOutcome::Unsupported => Ok(false),
        }
    }

    /// Arguments for a direct constructor attempt: zero values for
    /// primitives, the empty string, empty arrays, a recursively constructed
    /// instance, or a test double as the last resort.
    fn default_arguments(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        constructor: &MethodDescriptor,
    ) -> DomainResult<Option<Vec<ValueId>>> {
        let mut args = Vec::with_capacity(constructor.param_types.len());
        for ty in &constructor.param_types {
            let arg = if let Some(literal) = Literal::zero_for(ty) {
                trace.record_value(ValueKind::Primitive {
                    ty: ty.clone(),
                    literal,
                })?
            } else if ty == STRING_TYPE {
                trace.record_value(ValueKind::Str {
                    text: String::new(),
                })?
            } else if array_dimensions(ty) > 0 {
                trace.record_value(ValueKind::Sequence {
                    ty: ty.clone(),
                    components: Vec::new(),
                })?
            } else if let Some(found) = self.find_constructor(trace, ctx, ty)? {
                match trace.execution(found)?.produced_value() {
                    Some(value) => value,
                    None => return Ok(None),
                }
            } else if ctx.catalog.is_mockable(ty) {
                trace.record_value(ValueKind::Mock { ty: ty.clone() })?
            } else {
                return Ok(None);
            };
            args.push(arg);
        }
        Ok(Some(args))
    }

    /// Most accessible, simplest completed call producing exactly
    /// `type_name`, whose inputs can all be rebuilt.
    fn best_candidate(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        type_name: &str,
    ) -> DomainResult<Option<ExecutionId>> {
        let mut candidates = Vec::new();
        for execution in trace.executions() {
            if !execution.is_completed() || execution.throws() || execution.receiver.is_some() {
                continue;
            }
            let Some(method) = ctx.catalog.method(execution.method) else {
                continue;
            };
            if method.access == AccessLevel::Private || !Self::produces(method) {
                continue;
            }
            let Some(produced) = execution.produced_value() else {
                continue;
            };
            if trace.value(produced)?.ty() != type_name {
                continue;
            }
            candidates.push(Candidate {
                execution: execution.id,
                access_rank: method.access.rank(),
                object_params: method
                    .param_types
                    .iter()
                    .filter(|ty| is_object_type(ty))
                    .count(),
                params: method.param_types.len(),
            });
        }
        candidates.sort();

        for candidate in candidates {
            let params = trace.execution(candidate.execution)?.params.clone();
            let mut visited = HashSet::new();
            let mut buildable = true;
            for param in params {
                if !self.is_buildable(trace, ctx, param, &mut visited)? {
                    buildable = false;
                    break;
                }
            }
            if buildable {
                return Ok(Some(candidate.execution));
            }
        }
        Ok(None)
    }

    fn produces(method: &MethodDescriptor) -> bool {
        matches!(method.kind, MethodKind::Constructor | MethodKind::Static)
    }

    /// Whether a candidate's argument can be rebuilt: constants directly,
    /// containers through their elements, objects through a constructing
    /// call of their type or a test double.
    fn is_buildable(
        &mut self,
        trace: &mut ExecutionTrace,
        ctx: &SearchContext<'_>,
        value: ValueId,
        visited: &mut HashSet<ValueId>,
    ) -> DomainResult<bool> {
        if !visited.insert(value) {
            return Ok(true);
        }
        let kind = trace.value(value)?.kind.clone();
        match kind {
            ValueKind::Sequence { .. } | ValueKind::Map { .. } => {
                for child in kind.children() {
                    if !self.is_buildable(trace, ctx, child, visited)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ValueKind::Object { ty, .. } => {
                let has_definition = !trace.defining_executions(value)?.is_empty();
                Ok(has_definition
                    || self.find_constructor(trace, ctx, &ty)?.is_some()
                    || ctx.catalog.is_mockable(&ty))
            }
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtime::ScriptedProbe;
    use crate::adapters::static_catalog::StaticTypeCatalog;
    use crate::domain::models::{MethodId, ObservedValue, TypeInfo};
    use std::collections::BTreeMap;

    fn method(id: u32, owner: &str, name: &str, kind: MethodKind, access: AccessLevel) -> MethodDescriptor {
        MethodDescriptor {
            id: MethodId(id),
            declaring_type: owner.to_string(),
            name: name.to_string(),
            param_types: vec![],
            return_type: if kind == MethodKind::Constructor {
                "void".to_string()
            } else {
                owner.to_string()
            },
            access,
            kind,
            synthetic: false,
        }
    }

    fn widget(snapshot: &str) -> ObservedValue {
        ObservedValue::Object {
            ty: "com.acme.Widget".to_string(),
            identity: Some(11),
            snapshot: snapshot.to_string(),
            fields: BTreeMap::new(),
        }
    }

    fn catalog() -> StaticTypeCatalog {
        let mut catalog = StaticTypeCatalog::new();
        catalog.add_type(TypeInfo::new("com.acme.Widget"));
        catalog.add_method(method(1, "com.acme.Widget", "<init>", MethodKind::Constructor, AccessLevel::Private));
        catalog.add_method(method(2, "com.acme.Widget", "of", MethodKind::Static, AccessLevel::Public));
        catalog
    }

    #[test]
    fn test_prefers_public_factory_over_private_constructor() {
        let catalog = catalog();
        let probe = ScriptedProbe::new();
        let mut trace = ExecutionTrace::new();
        let w = trace.intern(&widget("size=1")).unwrap();
        let private_ctor = trace
            .record_execution(catalog.method(MethodId(1)).unwrap(), None, vec![], None)
            .unwrap();
        trace.complete_execution(private_ctor, None, Some(w)).unwrap();
        let factory = trace
            .record_execution(catalog.method(MethodId(2)).unwrap(), None, vec![], None)
            .unwrap();
        trace.complete_execution(factory, Some(w), None).unwrap();

        let mut search = ConstructionSearch::new();
        let ctx = SearchContext {
            catalog: &catalog,
            probe: &probe,
        };
        let found = search
            .find_constructor(&mut trace, &ctx, "com.acme.Widget")
            .unwrap();
        assert_eq!(found, Some(factory));
        assert_eq!(search.cached("com.acme.Widget"), Some(Some(factory)));
    }

    #[test]
    fn test_probes_public_factory_when_trace_has_none() {
        let catalog = catalog();
        let probe = ScriptedProbe::new().with_product(MethodId(2), widget("size=0"));
        let mut trace = ExecutionTrace::new();
        let mut search = ConstructionSearch::new();
        let ctx = SearchContext {
            catalog: &catalog,
            probe: &probe,
        };
        let found = search
            .find_constructor(&mut trace, &ctx, "com.acme.Widget")
            .unwrap()
            .unwrap();
        let execution = trace.execution(found).unwrap();
        assert!(execution.synthetic);
        assert_eq!(execution.method, MethodId(2));
        assert_eq!(execution.test_name, None);
    }

    #[test]
    fn test_unconstructible_type_is_cached_as_none() {
        let catalog = catalog();
        let probe = ScriptedProbe::new();
        let mut trace = ExecutionTrace::new();
        let mut search = ConstructionSearch::new();
        let ctx = SearchContext {
            catalog: &catalog,
            probe: &probe,
        };
        assert_eq!(
            search
                .find_constructor(&mut trace, &ctx, "com.acme.Widget")
                .unwrap(),
            None
        );
        assert_eq!(search.cached("com.acme.Widget"), Some(None));
        search.clear();
        assert_eq!(search.cached("com.acme.Widget"), None);
    }

    #[test]
    fn test_mutually_recursive_constructors_terminate() {
        let mut catalog = StaticTypeCatalog::new();
        catalog.add_type(TypeInfo::new("com.acme.Egg"));
        catalog.add_type(TypeInfo::new("com.acme.Hen"));
        let mut egg = method(1, "com.acme.Egg", "<init>", MethodKind::Constructor, AccessLevel::Public);
        egg.param_types = vec!["com.acme.Hen".to_string()];
        let mut hen = method(2, "com.acme.Hen", "<init>", MethodKind::Constructor, AccessLevel::Public);
        hen.param_types = vec!["com.acme.Egg".to_string()];
        catalog.add_method(egg);
        catalog.add_method(hen);
        let probe = ScriptedProbe::new();
        let mut trace = ExecutionTrace::new();
        let mut search = ConstructionSearch::new();
        let ctx = SearchContext {
            catalog: &catalog,
            probe: &probe,
        };
        let found = search.find_constructor(&mut trace, &ctx, "com.acme.Egg").unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_candidate_ranking() {
        let simple = Candidate {
            execution: ExecutionId(9),
            access_rank: 0,
            object_params: 0,
            params: 2,
        };
        let objecty = Candidate {
            execution: ExecutionId(1),
            access_rank: 0,
            object_params: 1,
            params: 2,
        };
        let protected = Candidate {
            execution: ExecutionId(0),
            access_rank: 1,
            object_params: 0,
            params: 0,
        };
        let mut ranked = vec![protected, objecty, simple];
        ranked.sort();
        assert_eq!(ranked, vec![simple, objecty, protected]);
    }
}
