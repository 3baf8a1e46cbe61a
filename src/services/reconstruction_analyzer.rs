//! Reconstructability analysis.
//!
//! Decides whether a target execution can become a test case and, if so,
//! how every value it needs is rebuilt. The outcome is a
//! [`ReconstructionPlan`]: one [`ValueStrategy`] per value id, the stub
//! registrations for test doubles, and the package the test must live in.
//!
//! Verdicts are two-layered. The outer `DomainResult` carries trace
//! integrity faults; the inner [`Verdict`] carries the expected, frequent
//! "cannot reconstruct" outcomes as a [`Rejection`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::errors::DomainResult;
use crate::domain::models::method::{array_dimensions, component_type, package_of};
use crate::domain::models::{
    AccessLevel, AssertionKind, ExecutionId, ExecutionTrace, GenerationConfig, MethodKind,
    MockOccurrence, RequiredPackage, ValueId, ValueKind,
};
use crate::domain::ports::{ConstructionProbe, TypeCatalog};
use crate::services::construction_search::{ConstructionSearch, SearchContext};

/// Why a target execution does not produce a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The call's end was never recorded.
    Incomplete,
    /// Constructors and static initializers are not targets.
    ConstructorTarget,
    /// Not callable from a test.
    PrivateMethod,
    /// Compiler-generated method.
    SyntheticMethod,
    /// Declared by a dependency.
    LibraryMethod,
    /// Declared outside the configured namespaces.
    OutsideNamespace,
    /// Equal calls produced different outcomes.
    NonDeterministic,
    /// The receiver's runtime type dispatches to a different method.
    AmbiguousDispatch,
    /// The receiver cannot be rebuilt.
    CalleeNotConstructible,
    /// A parameter cannot be rebuilt or doubled.
    ParamNotRecreatable,
    /// A doubled value is used in a way stubs cannot reproduce.
    UnmockableUsage,
    /// No single package can reach every member the test uses.
    AccessConflict,
    /// The call threw where a value test was needed.
    UnexpectedException,
    /// Nothing to assert on.
    VoidResult,
    /// The result has no equality assertion.
    NotAssertable,
    /// The call returned where an exception test was needed.
    NoException,
    /// A trace record the target depends on is malformed.
    IntegrityFault,
    /// Replay produced a different outcome.
    VerificationMismatch,
    /// Replay did not finish in time.
    VerificationTimeout,
}

impl Rejection {
    /// Stable snake_case name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::ConstructorTarget => "constructor_target",
            Self::PrivateMethod => "private_method",
            Self::SyntheticMethod => "synthetic_method",
            Self::LibraryMethod => "library_method",
            Self::OutsideNamespace => "outside_namespace",
            Self::NonDeterministic => "non_deterministic",
            Self::AmbiguousDispatch => "ambiguous_dispatch",
            Self::CalleeNotConstructible => "callee_not_constructible",
            Self::ParamNotRecreatable => "param_not_recreatable",
            Self::UnmockableUsage => "unmockable_usage",
            Self::AccessConflict => "access_conflict",
            Self::UnexpectedException => "unexpected_exception",
            Self::VoidResult => "void_result",
            Self::NotAssertable => "not_assertable",
            Self::NoException => "no_exception",
            Self::IntegrityFault => "integrity_fault",
            Self::VerificationMismatch => "verification_mismatch",
            Self::VerificationTimeout => "verification_timeout",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one eligibility check.
pub type Verdict<T = ()> = Result<T, Rejection>;

/// How one value is rebuilt in the generated test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueStrategy {
    /// Inline literal: null, primitive, string, enum constant, class literal.
    Constant,
    /// New buffer from its source string.
    StringBuffer,
    /// New array, collection or map filled element by element.
    Container,
    /// Replay the execution that produced the value in the trace.
    Replay { execution: ExecutionId },
    /// Call a constructing execution found by construction search, then
    /// write the fields the observed subtree reads.
    DefaultConstruct {
        execution: ExecutionId,
        fields: Vec<(String, ValueId)>,
    },
    /// Test double.
    Mock,
}

/// Everything analysis decided about one target.
#[derive(Debug, Clone)]
pub struct ReconstructionPlan {
    /// Execution under test.
    pub target: ExecutionId,
    /// How each value in the test is rebuilt.
    pub strategies: BTreeMap<ValueId, ValueStrategy>,
    /// Stub registrations for mocked values.
    pub stubs: Vec<MockOccurrence>,
    /// Package the test must be declared in.
    pub required_package: RequiredPackage,
    /// Chosen assertion, set once the plan is accepted.
    pub assertion: Option<AssertionKind>,
    path: HashSet<ValueId>,
    failed: HashSet<ValueId>,
    cycle_hits: usize,
    fields_read: HashMap<ValueId, BTreeSet<String>>,
}

impl ReconstructionPlan {
    fn new(target: ExecutionId) -> Self {
        Self {
            target,
            strategies: BTreeMap::new(),
            stubs: Vec::new(),
            required_package: RequiredPackage::Any,
            assertion: None,
            path: HashSet::new(),
            failed: HashSet::new(),
            cycle_hits: 0,
            fields_read: HashMap::new(),
        }
    }

    /// Strategy chosen for `value`, if it is part of the test.
    pub fn strategy(&self, value: ValueId) -> Option<&ValueStrategy> {
        self.strategies.get(&value)
    }

    /// Whether `value` is replaced by a test double.
    pub fn is_mocked(&self, value: ValueId) -> bool {
        matches!(self.strategies.get(&value), Some(ValueStrategy::Mock))
    }

    /// Values replaced by test doubles.
    pub fn mocks(&self) -> BTreeSet<ValueId> {
        self.strategies
            .iter()
            .filter(|(_, s)| matches!(s, ValueStrategy::Mock))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Stubs registered on `mock`, in call order.
    pub fn stubs_for(&self, mock: ValueId) -> impl Iterator<Item = &MockOccurrence> {
        self.stubs.iter().filter(move |s| s.mock == mock)
    }
}

/// Early return of a rejection from a check.
macro_rules! check {
    ($verdict:expr) => {
        if let Err(rejection) = $verdict {
            return Ok(Err(rejection));
        }
    };
}

fn access_constraint(access: AccessLevel, type_name: &str) -> RequiredPackage {
    match access {
        AccessLevel::Public => RequiredPackage::Any,
        AccessLevel::Protected | AccessLevel::Package => {
            RequiredPackage::Package(package_of(type_name).to_string())
        }
        AccessLevel::Private => RequiredPackage::Unsatisfiable,
    }
}

fn same_value(trace: &ExecutionTrace, a: Option<ValueId>, b: Option<ValueId>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => trace.values_equal(x, y),
        (None, None) => true,
        _ => false,
    }
}

fn same_values(trace: &ExecutionTrace, a: &[ValueId], b: &[ValueId]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| trace.values_equal(*x, *y))
}

/// Decides, per target execution, whether and how a test can be rebuilt.
pub struct ReconstructionAnalyzer {
    catalog: Arc<dyn TypeCatalog>,
    probe: Arc<dyn ConstructionProbe>,
    config: GenerationConfig,
    search: ConstructionSearch,
}

impl ReconstructionAnalyzer {
    /// Analyzer over `catalog`, probing constructors through `probe`.
    pub fn new(
        catalog: Arc<dyn TypeCatalog>,
        probe: Arc<dyn ConstructionProbe>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            catalog,
            probe,
            config,
            search: ConstructionSearch::new(),
        }
    }

    /// Clear run-scoped caches.
    pub fn reset(&mut self) {
        self.search.clear();
    }

    /// The type catalog analysis runs against.
    pub fn catalog(&self) -> &dyn TypeCatalog {
        self.catalog.as_ref()
    }

    /// Generation settings in effect.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Full analysis of one target: eligibility, then the assertion kind.
    pub fn analyze(
        &mut self,
        trace: &mut ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict<ReconstructionPlan>> {
        let mut plan = match self.test_set_up(trace, target)? {
            Ok(plan) => plan,
            Err(rejection) => return Ok(Err(rejection)),
        };
        let throws = trace.execution(target)?.throws();
        if throws {
            check!(self.exceptional_test_set_up(trace, target)?);
            plan.assertion = Some(AssertionKind::Exception);
        } else {
            check!(self.normal_test_set_up(trace, &mut plan)?);
            // The expected value may add constraints of its own.
            check!(self.check_and_set_required_package(trace, &mut plan)?);
            plan.assertion = Some(AssertionKind::Value);
        }
        Ok(Ok(plan))
    }

    /// Conjunction of the eligibility checks. Builds the reconstruction plan
    /// for the callee and parameters as a side effect.
    pub fn test_set_up(
        &mut self,
        trace: &mut ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict<ReconstructionPlan>> {
        let target = trace.canonical(target);
        check!(self.is_possible_target(trace, target)?);
        check!(self.target_is_best_match(trace, target)?);

        let mut plan = ReconstructionPlan::new(target);
        plan.fields_read = Self::collect_field_reads(trace, target)?;
        check!(self.can_construct_callee(trace, &mut plan)?);
        check!(self.can_recreate_params(trace, &mut plan)?);
        check!(self.check_and_set_required_package(trace, &mut plan)?);
        Ok(Ok(plan))
    }

    fn collect_field_reads(
        trace: &ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<HashMap<ValueId, BTreeSet<String>>> {
        let mut reads: HashMap<ValueId, BTreeSet<String>> = HashMap::new();
        for id in std::iter::once(target).chain(trace.descendants(target)) {
            for access in &trace.execution(id)?.fields_read {
                reads
                    .entry(access.owner)
                    .or_default()
                    .insert(access.field.clone());
            }
        }
        Ok(reads)
    }

    /// Basic target filters: complete, not a constructor, accessible,
    /// inside the namespace, and deterministic.
    pub fn is_possible_target(
        &self,
        trace: &ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict> {
        let execution = trace.execution(target)?;
        let method = self.catalog.require_method(execution.method)?;

        if !execution.is_completed() || !execution.can_test {
            return Ok(Err(Rejection::Incomplete));
        }
        if matches!(
            method.kind,
            MethodKind::Constructor | MethodKind::StaticInitializer
        ) {
            return Ok(Err(Rejection::ConstructorTarget));
        }
        if method.access == AccessLevel::Private {
            return Ok(Err(Rejection::PrivateMethod));
        }
        if method.synthetic || execution.synthetic {
            return Ok(Err(Rejection::SyntheticMethod));
        }
        if self.catalog.is_library_type(&method.declaring_type) {
            return Ok(Err(Rejection::LibraryMethod));
        }
        let owner_type = match execution.receiver {
            Some(receiver) => trace.value(receiver)?.ty().to_string(),
            None => method.declaring_type.clone(),
        };
        if !self.config.in_namespace(&owner_type) {
            return Ok(Err(Rejection::OutsideNamespace));
        }
        if trace.has_divergent_outcomes(target)? {
            return Ok(Err(Rejection::NonDeterministic));
        }
        Ok(Ok(()))
    }

    /// The call must dispatch to the recorded method on the receiver's
    /// runtime type, otherwise the generated call would run an override.
    pub fn target_is_best_match(
        &self,
        trace: &ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict> {
        let execution = trace.execution(target)?;
        let Some(receiver) = execution.receiver else {
            return Ok(Ok(()));
        };
        let method = self.catalog.require_method(execution.method)?;
        let runtime_type = trace.value(receiver)?.ty();
        match self.catalog.resolve_virtual(runtime_type, method) {
            Some(resolved) if resolved == method.id => Ok(Ok(())),
            _ => Ok(Err(Rejection::AmbiguousDispatch)),
        }
    }

    /// The receiver must be rebuilt concretely: replayed from its defining
    /// execution, produced by construction search, or an accessible
    /// constant. A test double never stands in for the callee.
    pub fn can_construct_callee(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
    ) -> DomainResult<Verdict> {
        let Some(receiver) = trace.execution(plan.target)?.receiver else {
            return Ok(Ok(()));
        };
        let kind = trace.value(receiver)?.kind.clone();
        let strategy = match kind {
            ValueKind::EnumConstant { .. } | ValueKind::ClassLiteral { .. } => {
                Some(ValueStrategy::Constant)
            }
            ValueKind::Mock { .. } | ValueKind::Null => None,
            ValueKind::Object { ref ty, .. } => {
                match self.plan_replay(trace, plan, receiver)? {
                    Some(strategy) => Some(strategy),
                    None => self.plan_default_construction(trace, plan, receiver, ty)?,
                }
            }
            _ => {
                if self.can_recreate_param(trace, plan, receiver)? && !plan.is_mocked(receiver) {
                    plan.strategies.get(&receiver).cloned()
                } else {
                    None
                }
            }
        };
        match strategy {
            Some(strategy) => {
                plan.strategies.insert(receiver, strategy);
                Ok(Ok(()))
            }
            None => Ok(Err(Rejection::CalleeNotConstructible)),
        }
    }

    /// Every parameter is rebuilt concretely or safely mocked, and no mocked
    /// value is used in a way a test double cannot reproduce.
    pub fn can_recreate_params(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
    ) -> DomainResult<Verdict> {
        let params = trace.execution(plan.target)?.params.clone();
        for param in params {
            if !self.can_recreate_param(trace, plan, param)? {
                return Ok(Err(Rejection::ParamNotRecreatable));
            }
        }
        if self.has_unmockable_usages(trace, plan)? {
            return Ok(Err(Rejection::UnmockableUsage));
        }
        Ok(Ok(()))
    }

    /// Whether `value` can be rebuilt, concretely or as a test double.
    /// Records the chosen strategy in the plan.
    pub fn can_recreate_param(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        value: ValueId,
    ) -> DomainResult<bool> {
        if plan.strategies.contains_key(&value) {
            return Ok(true);
        }
        if plan.failed.contains(&value) {
            return Ok(false);
        }
        let kind = trace.value(value)?.kind.clone();
        if plan.path.contains(&value) {
            // A container on the current path becomes a back reference; any
            // other revisit is a construction cycle.
            if matches!(kind, ValueKind::Sequence { .. } | ValueKind::Map { .. }) {
                return Ok(true);
            }
            plan.cycle_hits += 1;
            return Ok(false);
        }

        let hits_before = plan.cycle_hits;
        let strategy = self.plan_value(trace, plan, value, &kind)?;
        match strategy {
            Some(strategy) => {
                trace!(%value, ?strategy, "value planned");
                plan.strategies.insert(value, strategy);
                Ok(true)
            }
            None => {
                if plan.cycle_hits == hits_before {
                    plan.failed.insert(value);
                }
                Ok(false)
            }
        }
    }

    fn plan_value(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        value: ValueId,
        kind: &ValueKind,
    ) -> DomainResult<Option<ValueStrategy>> {
        match kind {
            ValueKind::Null
            | ValueKind::Primitive { .. }
            | ValueKind::Str { .. }
            | ValueKind::EnumConstant { .. }
            | ValueKind::ClassLiteral { .. } => Ok(Some(ValueStrategy::Constant)),
            ValueKind::Mock { ty } => Ok(self.can_mock(ty).then_some(ValueStrategy::Mock)),
            ValueKind::StringBuffer { source, .. } => Ok(self
                .can_recreate_param(trace, plan, *source)?
                .then_some(ValueStrategy::StringBuffer)),
            ValueKind::Sequence { ty, .. } | ValueKind::Map { ty, .. } => {
                if self.all_children_recreatable(trace, plan, value, kind)? {
                    return Ok(Some(ValueStrategy::Container));
                }
                if self.is_var_to_mock(trace, value)? {
                    return Ok(Some(ValueStrategy::Mock));
                }
                trace!(%value, ty = %ty, "container not recreatable");
                Ok(None)
            }
            ValueKind::Object { ty, .. } => {
                if let Some(strategy) = self.plan_replay(trace, plan, value)? {
                    return Ok(Some(strategy));
                }
                if self.is_var_to_mock(trace, value)? {
                    return Ok(Some(ValueStrategy::Mock));
                }
                self.plan_default_construction(trace, plan, value, ty)
            }
        }
    }

    fn all_children_recreatable(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        value: ValueId,
        kind: &ValueKind,
    ) -> DomainResult<bool> {
        plan.path.insert(value);
        let mut ok = true;
        for child in kind.children() {
            if !self.can_recreate_param(trace, plan, child)? {
                ok = false;
                break;
            }
        }
        plan.path.remove(&value);
        Ok(ok)
    }

    /// Whether a test double may stand in for a value of `type_name`.
    pub fn can_mock(&self, type_name: &str) -> bool {
        self.config.allow_mocks
            && !self.config.unmockable_types.iter().any(|t| t == type_name)
            && self.catalog.is_mockable(type_name)
    }

    /// A value needs a test double when it is a non-null reference value
    /// whose closure could not be rebuilt concretely. Callers consult this
    /// after the concrete attempt failed; it answers whether the double is
    /// allowed for the value's type.
    pub fn is_var_to_mock(&self, trace: &ExecutionTrace, value: ValueId) -> DomainResult<bool> {
        let detail = trace.value(value)?;
        Ok(detail.kind.is_composite() && self.can_mock(detail.ty()))
    }

    /// Replay one of the executions that produced `value`.
    fn plan_replay(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        value: ValueId,
    ) -> DomainResult<Option<ValueStrategy>> {
        let definitions = trace.defining_executions(value)?;
        plan.path.insert(value);
        let mut chosen = None;
        for definition in definitions {
            if definition == plan.target {
                continue;
            }
            let execution = trace.execution(definition)?;
            if !execution.is_completed() || execution.throws() {
                continue;
            }
            let Some(method) = self.catalog.method(execution.method) else {
                continue;
            };
            if method.access == AccessLevel::Private
                || method.kind == MethodKind::StaticInitializer
            {
                continue;
            }
            let inputs: Vec<ValueId> = execution.inputs().collect();
            let receiver = execution.receiver;
            if trace.has_divergent_outcomes(definition)? {
                continue;
            }
            let mut ok = true;
            for input in inputs {
                if !self.can_recreate_param(trace, plan, input)? {
                    ok = false;
                    break;
                }
            }
            // A stubbed receiver would only echo the recorded value back.
            if ok && receiver.is_some_and(|r| plan.is_mocked(r)) {
                ok = false;
            }
            if ok {
                chosen = Some(ValueStrategy::Replay {
                    execution: definition,
                });
                break;
            }
        }
        plan.path.remove(&value);
        Ok(chosen)
    }

    /// Build an instance through construction search, then restore the
    /// fields the observed subtree reads.
    fn plan_default_construction(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        value: ValueId,
        type_name: &str,
    ) -> DomainResult<Option<ValueStrategy>> {
        let ctx = SearchContext {
            catalog: self.catalog.as_ref(),
            probe: self.probe.as_ref(),
        };
        let Some(constructor) = self.search.find_constructor(trace, &ctx, type_name)? else {
            return Ok(None);
        };

        let recorded_fields = match &trace.value(value)?.kind {
            ValueKind::Object { fields, .. } => fields.clone(),
            _ => BTreeMap::new(),
        };
        let read = plan.fields_read.get(&value).cloned().unwrap_or_default();
        let inputs: Vec<ValueId> = trace.execution(constructor)?.inputs().collect();

        plan.path.insert(value);
        let mut result = Some(Vec::new());
        for input in inputs {
            if !self.can_recreate_param(trace, plan, input)? {
                result = None;
                break;
            }
        }
        if let Some(fields) = result.as_mut() {
            for name in read {
                let Some(field_value) = recorded_fields.get(&name).copied() else {
                    result = None;
                    break;
                };
                if !self.can_recreate_param(trace, plan, field_value)? {
                    result = None;
                    break;
                }
                fields.push((name, field_value));
            }
        }
        plan.path.remove(&value);

        Ok(result.map(|fields| ValueStrategy::DefaultConstruct {
            execution: constructor,
            fields,
        }))
    }

    /// Depth-first walk of the target's call subtree. Calls on a test
    /// double become stubs and are not descended into. Returns true when a
    /// double would be used in a way it cannot reproduce: a direct field
    /// access, an identity-sensitive call, a stubbed return value that
    /// cannot be rebuilt, or a hand-off into library code.
    pub fn has_unmockable_usages(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
    ) -> DomainResult<bool> {
        if self.touches_mock_unsafely(trace, plan, plan.target)? {
            return Ok(true);
        }
        let mut stack: Vec<ExecutionId> = trace.children(plan.target).iter().rev().copied().collect();
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let execution = trace.execution(id)?;
            let receiver = execution.receiver;
            let method = self.catalog.require_method(execution.method)?;
            if let Some(mock) = receiver.filter(|r| plan.is_mocked(*r)) {
                // The double answers instead of the real body, so only the
                // call itself matters.
                if method.is_identity_sensitive() || !self.register_stub(trace, plan, mock, id)? {
                    return Ok(true);
                }
                continue;
            }
            if self.touches_mock_unsafely(trace, plan, id)? {
                return Ok(true);
            }
            for child in trace.children(id).iter().rev() {
                if !visited.contains(child) {
                    stack.push(*child);
                }
            }
        }
        Ok(false)
    }

    fn touches_mock_unsafely(
        &self,
        trace: &ExecutionTrace,
        plan: &ReconstructionPlan,
        id: ExecutionId,
    ) -> DomainResult<bool> {
        let execution = trace.execution(id)?;
        if execution.fields_read.iter().any(|a| plan.is_mocked(a.owner)) {
            return Ok(true);
        }
        let method = self.catalog.require_method(execution.method)?;
        let mocked_input = execution.inputs().any(|v| plan.is_mocked(v));
        if mocked_input && method.is_identity_sensitive() {
            return Ok(true);
        }
        let mocked_param = execution.params.iter().any(|v| plan.is_mocked(*v));
        if mocked_param && self.catalog.is_library_type(&method.declaring_type) {
            return Ok(true);
        }
        Ok(false)
    }

    /// Record the stub for a call made on a test double. Returns false when
    /// the stub cannot be expressed.
    fn register_stub(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
        mock: ValueId,
        id: ExecutionId,
    ) -> DomainResult<bool> {
        let execution = trace.execution(id)?;
        let occurrence = MockOccurrence {
            mock,
            execution: execution.id,
            method: execution.method,
            args: execution.params.clone(),
            returns: execution.return_value(),
            throws: execution.exception().map(str::to_string),
        };
        if let Some(returned) = occurrence.returns {
            if !self.can_recreate_param(trace, plan, returned)? {
                return Ok(false);
            }
        }
        // The double can only give one answer for the same call.
        let conflicting = plan.stubs.iter().any(|s| {
            s.mock == mock
                && s.method == occurrence.method
                && same_values(trace, &s.args, &occurrence.args)
                && (!same_value(trace, s.returns, occurrence.returns) || s.throws != occurrence.throws)
        });
        if conflicting {
            return Ok(false);
        }
        // Exact matchers need their arguments; failures fall back to
        // type-only matchers at assembly.
        for arg in occurrence.args.clone() {
            self.can_recreate_param(trace, plan, arg)?;
        }
        let duplicate = plan.stubs.iter().any(|s| {
            s.mock == mock
                && s.method == occurrence.method
                && same_values(trace, &s.args, &occurrence.args)
        });
        if !duplicate {
            plan.stubs.push(occurrence);
        }
        Ok(true)
    }

    /// Unify the access constraints of everything the test touches into
    /// one required package, and store it on the target.
    pub fn check_and_set_required_package(
        &self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
    ) -> DomainResult<Verdict> {
        let target = trace.execution(plan.target)?;
        let method = self.catalog.require_method(target.method)?;
        let mut required = access_constraint(method.access, &method.declaring_type)
            .unify(&self.type_constraint(&method.declaring_type));

        for (value, strategy) in &plan.strategies {
            let constraint = match strategy {
                ValueStrategy::Replay { execution }
                | ValueStrategy::DefaultConstruct { execution, .. } => {
                    let method = self
                        .catalog
                        .require_method(trace.execution(*execution)?.method)?;
                    access_constraint(method.access, &method.declaring_type)
                        .unify(&self.type_constraint(&method.declaring_type))
                }
                ValueStrategy::Constant => match &trace.value(*value)?.kind {
                    ValueKind::EnumConstant { ty, .. } => self.type_constraint(ty),
                    ValueKind::ClassLiteral { name } => self.type_constraint(name),
                    _ => RequiredPackage::Any,
                },
                ValueStrategy::Mock | ValueStrategy::Container => {
                    self.type_constraint(trace.value(*value)?.ty())
                }
                ValueStrategy::StringBuffer => RequiredPackage::Any,
            };
            required = required.unify(&constraint);
        }
        for stub in &plan.stubs {
            let method = self.catalog.require_method(stub.method)?;
            required = required.unify(&access_constraint(method.access, &method.declaring_type));
        }

        if !required.is_satisfiable() {
            return Ok(Err(Rejection::AccessConflict));
        }
        let execution = trace.execution_mut(plan.target)?;
        execution.required_package = Some(required.clone());
        execution.mock_occurrences = plan.stubs.clone();
        plan.required_package = required;
        Ok(Ok(()))
    }

    fn type_constraint(&self, type_name: &str) -> RequiredPackage {
        let mut base = type_name;
        while let Some(component) = component_type(base) {
            base = component;
        }
        self.catalog
            .type_info(base)
            .map_or(RequiredPackage::Any, |info| access_constraint(info.access, base))
    }

    /// A value assertion needs a non-exceptional, non-void call whose return
    /// value is assertable and rebuildable as the expected operand.
    pub fn normal_test_set_up(
        &mut self,
        trace: &mut ExecutionTrace,
        plan: &mut ReconstructionPlan,
    ) -> DomainResult<Verdict> {
        let execution = trace.execution(plan.target)?;
        if execution.throws() {
            return Ok(Err(Rejection::UnexpectedException));
        }
        if self.catalog.require_method(execution.method)?.is_void() {
            return Ok(Err(Rejection::VoidResult));
        }
        check!(self.target_is_assertable(trace, plan.target)?);
        if let Some(returned) = trace.execution(plan.target)?.return_value() {
            if !self.can_recreate_param(trace, plan, returned)? || plan.is_mocked(returned) {
                return Ok(Err(Rejection::NotAssertable));
            }
        }
        Ok(Ok(()))
    }

    /// An exception assertion needs a call that threw.
    pub fn exceptional_test_set_up(
        &self,
        trace: &ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict> {
        let execution = trace.execution(target)?;
        if execution.throws() {
            Ok(Ok(()))
        } else {
            Ok(Err(Rejection::NoException))
        }
    }

    /// Whether the target's return value can be asserted on.
    pub fn target_is_assertable(
        &self,
        trace: &ExecutionTrace,
        target: ExecutionId,
    ) -> DomainResult<Verdict> {
        let execution = trace.execution(target)?;
        let method = self.catalog.require_method(execution.method)?;
        let Some(returned) = execution.return_value() else {
            return Ok(Err(Rejection::NotAssertable));
        };
        if self.var_detail_is_assertable(trace, returned, &method.return_type)? {
            Ok(Ok(()))
        } else {
            Ok(Err(Rejection::NotAssertable))
        }
    }

    /// Whether an equality assertion can be written for `value` when the
    /// call site declares `declared_type`: constants and string buffers
    /// always; arrays when declared and runtime dimensions agree and every
    /// component is assertable; collections when every component is; maps
    /// only with primitive or wrapper keys and values; objects never.
    pub fn var_detail_is_assertable(
        &self,
        trace: &ExecutionTrace,
        value: ValueId,
        declared_type: &str,
    ) -> DomainResult<bool> {
        let mut visited = HashSet::new();
        self.assertable_inner(trace, value, declared_type, &mut visited)
    }

    fn assertable_inner(
        &self,
        trace: &ExecutionTrace,
        value: ValueId,
        declared_type: &str,
        visited: &mut HashSet<ValueId>,
    ) -> DomainResult<bool> {
        if !visited.insert(value) {
            return Ok(false);
        }
        let detail = trace.value(value)?;
        let assertable = match &detail.kind {
            ValueKind::Null
            | ValueKind::Primitive { .. }
            | ValueKind::Str { .. }
            | ValueKind::StringBuffer { .. }
            | ValueKind::EnumConstant { .. }
            | ValueKind::ClassLiteral { .. } => true,
            ValueKind::Sequence { ty, components } => {
                let dims = array_dimensions(ty);
                if dims > 0 && dims != array_dimensions(declared_type) {
                    false
                } else {
                    let element_type = component_type(ty).unwrap_or("java.lang.Object");
                    let mut all = true;
                    for component in components {
                        if !self.assertable_inner(trace, *component, element_type, visited)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
            }
            ValueKind::Map { entries, .. } => {
                let mut all = true;
                for (key, entry) in entries {
                    let key_ok = matches!(trace.value(*key)?.kind, ValueKind::Primitive { .. });
                    let value_ok = matches!(trace.value(*entry)?.kind, ValueKind::Primitive { .. });
                    if !(key_ok && value_ok) {
                        all = false;
                        break;
                    }
                }
                all
            }
            ValueKind::Object { .. } | ValueKind::Mock { .. } => false,
        };
        visited.remove(&value);
        Ok(assertable)
    }
}
