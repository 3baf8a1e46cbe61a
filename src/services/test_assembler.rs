//! Test assembly.
//!
//! Turns an accepted [`ReconstructionPlan`] into an ordered statement list
//! and a final assertion. Values are materialized on demand, depth first,
//! and each value id is declared at most once; later uses refer to the
//! variable already bound to it. Containers are bound before their elements
//! are filled in, so a container reached again through its own elements is
//! emitted as a reference to its variable rather than rebuilt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult, TraceEntryKind};
use crate::domain::models::method::{array_dimensions, component_type, is_floating_type, simple_name};
use crate::domain::models::value::{OBJECT_TYPE, STRING_TYPE};
use crate::domain::models::{
    ArgMatcher, AssemblyState, Assertion, AssertionKind, Call, ExecutionId, ExecutionTrace,
    Expression, MethodDescriptor, MethodKind, Operand, Statement, StubAnswer, TestCase, ValueId,
    ValueKind,
};
use crate::domain::ports::TypeCatalog;
use crate::services::reconstruction_analyzer::{ReconstructionPlan, ValueStrategy};

fn advance(state: &mut AssemblyState, next: AssemblyState) -> DomainResult<()> {
    if !state.can_transition_to(next) {
        return Err(DomainError::TraceCorrupted(format!(
            "invalid assembly transition {} -> {}",
            state.as_str(),
            next.as_str()
        )));
    }
    *state = next;
    Ok(())
}

/// Variable name stem for a type: `com.acme.Counter` → `counter`,
/// `int[]` → `intArray`.
fn name_stem(type_name: &str) -> String {
    let simple = simple_name(type_name);
    let base = simple.trim_end_matches("[]");
    let mut stem: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if let Some(first) = stem.get(..1) {
        let lowered = first.to_lowercase();
        stem.replace_range(..1, &lowered);
    }
    if array_dimensions(simple) > 0 {
        stem.push_str("Array");
    }
    if stem.is_empty() {
        stem.push_str("value");
    }
    stem
}

fn test_name(method: &MethodDescriptor, ordinal: usize) -> String {
    let mut chars = method.name.chars().filter(|c| c.is_alphanumeric());
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("test{capitalized}{ordinal}")
}

struct Materializer<'a> {
    trace: &'a ExecutionTrace,
    catalog: &'a dyn TypeCatalog,
    plan: &'a ReconstructionPlan,
    statements: Vec<Statement>,
    vars: BTreeMap<ValueId, String>,
    stems: HashMap<String, usize>,
}

impl<'a> Materializer<'a> {
    fn new(
        trace: &'a ExecutionTrace,
        catalog: &'a dyn TypeCatalog,
        plan: &'a ReconstructionPlan,
    ) -> Self {
        Self {
            trace,
            catalog,
            plan,
            statements: Vec::new(),
            vars: BTreeMap::new(),
            stems: HashMap::new(),
        }
    }

    fn fresh_name(&mut self, type_name: &str) -> String {
        let stem = name_stem(type_name);
        let counter = self.stems.entry(stem.clone()).or_insert(0);
        let name = format!("{stem}{counter}");
        *counter += 1;
        name
    }

    /// Operand for `value` where `declared_type` is expected.
    fn operand(&mut self, value: ValueId, declared_type: &str) -> DomainResult<Operand> {
        if value == self.trace.null_value() {
            return Ok(Operand::Null {
                ty: declared_type.to_string(),
            });
        }
        if let Some(name) = self.vars.get(&value) {
            return Ok(Operand::var(name.clone()));
        }
        let name = self.materialize(value)?;
        Ok(Operand::var(name))
    }

    fn declare(&mut self, value: ValueId, ty: &str, expression: Expression) -> String {
        let name = self.fresh_name(ty);
        self.vars.insert(value, name.clone());
        self.statements.push(Statement::Declare {
            name: name.clone(),
            ty: ty.to_string(),
            value,
            expression,
        });
        name
    }

    fn materialize(&mut self, value: ValueId) -> DomainResult<String> {
        let strategy = self
            .plan
            .strategy(value)
            .cloned()
            .ok_or_else(|| DomainError::MissingTraceEntry {
                kind: TraceEntryKind::Value,
                id: format!("{value} (no reconstruction strategy)"),
            })?;
        let kind = self.trace.value(value)?.kind.clone();
        match strategy {
            ValueStrategy::Constant => self.constant(value, &kind),
            ValueStrategy::StringBuffer => {
                let ValueKind::StringBuffer { ty, source, .. } = &kind else {
                    return Err(self.unexpected_kind(value));
                };
                let source = self.operand(*source, STRING_TYPE)?;
                Ok(self.declare(value, ty, Expression::NewStringBuffer { ty: ty.clone(), source }))
            }
            ValueStrategy::Container => self.container(value, &kind),
            ValueStrategy::Replay { execution } => self.replay(value, execution),
            ValueStrategy::DefaultConstruct { execution, fields } => {
                let name = self.replay(value, execution)?;
                let owner_type = kind.ty().to_string();
                for (field, field_value) in fields {
                    let declared = self
                        .catalog
                        .type_info(&owner_type)
                        .and_then(|info| info.field(&field))
                        .map_or_else(|| OBJECT_TYPE.to_string(), |f| f.ty.clone());
                    let operand = self.operand(field_value, &declared)?;
                    self.statements.push(Statement::SetField {
                        target: name.clone(),
                        owner_type: owner_type.clone(),
                        field,
                        value: operand,
                    });
                }
                Ok(name)
            }
            ValueStrategy::Mock => self.mock(value, kind.ty()),
        }
    }

    fn unexpected_kind(&self, value: ValueId) -> DomainError {
        DomainError::TraceCorrupted(format!("value {value} does not match its planned strategy"))
    }

    fn constant(&mut self, value: ValueId, kind: &ValueKind) -> DomainResult<String> {
        let expression = match kind {
            ValueKind::Primitive { ty, literal } => Expression::Literal {
                ty: ty.clone(),
                value: *literal,
            },
            ValueKind::Str { text } => Expression::Str { text: text.clone() },
            ValueKind::EnumConstant { ty, name } => Expression::EnumConstant {
                ty: ty.clone(),
                name: name.clone(),
            },
            ValueKind::ClassLiteral { name } => Expression::ClassLiteral { name: name.clone() },
            _ => return Err(self.unexpected_kind(value)),
        };
        Ok(self.declare(value, kind.ty(), expression))
    }

    fn container(&mut self, value: ValueId, kind: &ValueKind) -> DomainResult<String> {
        match kind {
            ValueKind::Sequence { ty, components } if array_dimensions(ty) > 0 => {
                let name = self.declare(
                    value,
                    ty,
                    Expression::NewArray {
                        ty: ty.clone(),
                        length: components.len(),
                    },
                );
                let element_type = component_type(ty).unwrap_or(OBJECT_TYPE).to_string();
                for (index, component) in components.iter().enumerate() {
                    // Unset slots already hold the default.
                    if *component == self.trace.null_value() {
                        continue;
                    }
                    let operand = self.operand(*component, &element_type)?;
                    self.statements.push(Statement::SetElement {
                        array: name.clone(),
                        index,
                        value: operand,
                    });
                }
                Ok(name)
            }
            ValueKind::Sequence { ty, components } => {
                let name = self.declare(value, ty, Expression::NewContainer { ty: ty.clone() });
                for component in components {
                    let operand = self.operand(*component, OBJECT_TYPE)?;
                    self.statements.push(Statement::AddElement {
                        collection: name.clone(),
                        value: operand,
                    });
                }
                Ok(name)
            }
            ValueKind::Map { ty, entries } => {
                let name = self.declare(value, ty, Expression::NewContainer { ty: ty.clone() });
                for (key, entry) in entries {
                    let key = self.operand(*key, OBJECT_TYPE)?;
                    let entry = self.operand(*entry, OBJECT_TYPE)?;
                    self.statements.push(Statement::PutEntry {
                        map: name.clone(),
                        key,
                        value: entry,
                    });
                }
                Ok(name)
            }
            _ => Err(self.unexpected_kind(value)),
        }
    }

    fn call_for(&mut self, execution: ExecutionId) -> DomainResult<(Call, &'a MethodDescriptor)> {
        let (trace, catalog) = (self.trace, self.catalog);
        let recorded = trace.execution(execution)?;
        let method = catalog.require_method(recorded.method)?;
        let receiver = match recorded.receiver {
            Some(receiver) => Some(self.operand(receiver, &method.declaring_type)?),
            None => None,
        };
        let mut args = Vec::with_capacity(recorded.params.len());
        for (param, declared) in recorded.params.iter().zip(&method.param_types) {
            args.push(self.operand(*param, declared)?);
        }
        Ok((
            Call {
                method: method.id,
                declaring_type: method.declaring_type.clone(),
                name: method.name.clone(),
                receiver,
                args,
                constructor: method.kind == MethodKind::Constructor,
            },
            method,
        ))
    }

    /// Re-run the call that produced `value`. A receiver-state value is the
    /// receiver variable itself after the call.
    fn replay(&mut self, value: ValueId, execution: ExecutionId) -> DomainResult<String> {
        let (call, method) = self.call_for(execution)?;
        if let Some(name) = self.vars.get(&value) {
            // Reached through the call's own inputs.
            return Ok(name.clone());
        }
        let trace = self.trace;
        let recorded = trace.execution(execution)?;
        let declared = match method.kind {
            MethodKind::Constructor => Some(method.declaring_type.clone()),
            _ if recorded.return_value().is_some() => Some(method.return_type.clone()),
            _ => None,
        };
        match declared {
            Some(ty) => Ok(self.declare(value, &ty, Expression::Invoke { call })),
            None => {
                let receiver = call
                    .receiver
                    .as_ref()
                    .and_then(Operand::var_name)
                    .map(str::to_string)
                    .ok_or_else(|| self.unexpected_kind(value))?;
                self.statements.push(Statement::Call { call });
                self.vars.insert(value, receiver.clone());
                Ok(receiver)
            }
        }
    }

    fn mock(&mut self, value: ValueId, ty: &str) -> DomainResult<String> {
        let name = self.declare(value, ty, Expression::Mock { ty: ty.to_string() });
        let stubs: Vec<_> = self.plan.stubs_for(value).cloned().collect();
        let catalog = self.catalog;
        for stub in stubs {
            let method = catalog.require_method(stub.method)?;
            let mut matchers = Vec::with_capacity(stub.args.len());
            for (arg, declared) in stub.args.iter().zip(&method.param_types) {
                let matcher = if *arg == self.trace.null_value()
                    || self.vars.contains_key(arg)
                    || self.plan.strategy(*arg).is_some()
                {
                    ArgMatcher::Exact {
                        value: self.operand(*arg, declared)?,
                    }
                } else {
                    ArgMatcher::Any {
                        ty: declared.clone(),
                    }
                };
                matchers.push(matcher);
            }
            let answer = match (&stub.throws, stub.returns) {
                (Some(exception), _) => StubAnswer::Throws {
                    exception: exception.clone(),
                },
                (None, Some(returned)) => StubAnswer::Returns {
                    value: self.operand(returned, &method.return_type)?,
                },
                (None, None) => StubAnswer::DoNothing,
            };
            self.statements.push(Statement::Stub {
                mock: name.clone(),
                method: method.id,
                name: method.name.clone(),
                matchers,
                answer,
            });
        }
        Ok(name)
    }
}

/// Whether an equality assertion on `value` needs a floating point tolerance.
fn needs_tolerance(trace: &ExecutionTrace, value: ValueId, declared_type: &str) -> DomainResult<bool> {
    if is_floating_type(declared_type) {
        return Ok(true);
    }
    Ok(match &trace.value(value)?.kind {
        ValueKind::Primitive { ty, .. } => is_floating_type(ty),
        ValueKind::Sequence { ty, .. } => {
            let mut base = ty.as_str();
            while let Some(component) = component_type(base) {
                base = component;
            }
            is_floating_type(base)
        }
        _ => false,
    })
}

/// Turns accepted plans into statement lists.
pub struct TestAssembler {
    catalog: Arc<dyn TypeCatalog>,
    float_tolerance: f64,
}

impl TestAssembler {
    /// `float_tolerance` bounds floating point equality assertions.
    pub fn new(catalog: Arc<dyn TypeCatalog>, float_tolerance: f64) -> Self {
        Self {
            catalog,
            float_tolerance,
        }
    }

    /// Assemble the test case for an accepted plan. `ordinal` numbers test
    /// methods of the same target method.
    pub fn assemble(
        &self,
        trace: &ExecutionTrace,
        plan: &ReconstructionPlan,
        ordinal: usize,
    ) -> DomainResult<TestCase> {
        let execution = trace.execution(plan.target)?;
        let method = self.catalog.require_method(execution.method)?;
        let assertion_kind = plan.assertion.ok_or_else(|| {
            DomainError::TraceCorrupted(format!("plan for {} has no assertion kind", plan.target))
        })?;
        let mut state = AssemblyState::Setup;
        let mut m = Materializer::new(trace, self.catalog.as_ref(), plan);

        let mut args = Vec::with_capacity(execution.params.len());
        for (param, declared) in execution.params.iter().zip(&method.param_types) {
            args.push(m.operand(*param, declared)?);
        }
        advance(&mut state, AssemblyState::ParamsResolved)?;

        let receiver = match execution.receiver {
            Some(receiver) => Some(m.operand(receiver, &method.declaring_type)?),
            None => None,
        };
        advance(&mut state, AssemblyState::CalleeResolved)?;

        let invocation = Call {
            method: method.id,
            declaring_type: method.declaring_type.clone(),
            name: method.name.clone(),
            receiver,
            args,
            constructor: false,
        };
        advance(&mut state, AssemblyState::Invoked)?;

        let (result_variable, assertion) = match assertion_kind {
            AssertionKind::Value => {
                let returned = execution.return_value().ok_or_else(|| {
                    DomainError::TraceCorrupted(format!(
                        "value assertion planned for {} without a return value",
                        plan.target
                    ))
                })?;
                let expected = m.operand(returned, &method.return_type)?;
                let tolerance = needs_tolerance(trace, returned, &method.return_type)?
                    .then_some(self.float_tolerance);
                advance(&mut state, AssemblyState::Asserted)?;
                (
                    Some(("result".to_string(), method.return_type.clone())),
                    Assertion::Equals {
                        expected,
                        actual: "result".to_string(),
                        tolerance,
                    },
                )
            }
            AssertionKind::Exception => {
                let exception = execution.exception().ok_or_else(|| {
                    DomainError::TraceCorrupted(format!(
                        "exception assertion planned for {} without an exception",
                        plan.target
                    ))
                })?;
                advance(&mut state, AssemblyState::ExceptionAsserted)?;
                (
                    None,
                    Assertion::Throws {
                        exception: exception.to_string(),
                    },
                )
            }
        };

        let required_package = plan
            .required_package
            .as_package_name()
            .ok_or_else(|| {
                DomainError::TraceCorrupted(format!(
                    "unsatisfiable package constraint reached assembly for {}",
                    plan.target
                ))
            })?
            .to_string();

        Ok(TestCase::new(
            test_name(method, ordinal),
            plan.target,
            method.declaring_type.clone(),
            required_package,
            m.statements,
            invocation,
            result_variable,
            assertion,
            m.vars,
            execution.test_name.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtime::ScriptedProbe;
    use crate::adapters::static_catalog::StaticTypeCatalog;
    use crate::domain::models::{
        AccessLevel, GenerationConfig, Literal, MethodId, ObservedValue, TypeInfo,
    };
    use crate::services::reconstruction_analyzer::ReconstructionAnalyzer;

    fn catalog() -> Arc<StaticTypeCatalog> {
        let mut catalog = StaticTypeCatalog::new();
        catalog.add_type(TypeInfo::new("com.acme.MathUtil"));
        catalog.add_method(MethodDescriptor {
            id: MethodId(1),
            declaring_type: "com.acme.MathUtil".to_string(),
            name: "add".to_string(),
            param_types: vec!["int".to_string(), "int".to_string()],
            return_type: "int".to_string(),
            access: AccessLevel::Public,
            kind: MethodKind::Static,
            synthetic: false,
        });
        catalog.add_method(MethodDescriptor {
            id: MethodId(2),
            declaring_type: "com.acme.MathUtil".to_string(),
            name: "first".to_string(),
            param_types: vec!["java.lang.Object[]".to_string()],
            return_type: "java.lang.Object".to_string(),
            access: AccessLevel::Public,
            kind: MethodKind::Static,
            synthetic: false,
        });
        Arc::new(catalog)
    }

    fn plan_for(
        catalog: &Arc<StaticTypeCatalog>,
        trace: &mut ExecutionTrace,
        target: ExecutionId,
    ) -> ReconstructionPlan {
        let mut analyzer = ReconstructionAnalyzer::new(
            catalog.clone(),
            Arc::new(ScriptedProbe::new()),
            GenerationConfig::default(),
        );
        analyzer.analyze(trace, target).unwrap().unwrap()
    }

    #[test]
    fn test_repeated_argument_is_declared_once() {
        let catalog = catalog();
        let mut trace = ExecutionTrace::new();
        let two = trace.intern(&ObservedValue::int(2)).unwrap();
        let four = trace.intern(&ObservedValue::int(4)).unwrap();
        let add = trace
            .record_execution(catalog.method(MethodId(1)).unwrap(), None, vec![two, two], None)
            .unwrap();
        trace.complete_execution(add, Some(four), None).unwrap();

        let plan = plan_for(&catalog, &mut trace, add);
        let assembler = TestAssembler::new(catalog.clone(), 1e-6);
        let case = assembler.assemble(&trace, &plan, 0).unwrap();

        assert_eq!(case.name, "testAdd0");
        assert!(case.declaration_counts().values().all(|count| *count == 1));
        assert_eq!(case.declaration_counts().get(&two), Some(&1));
        assert_eq!(case.invocation.args, vec![Operand::var("int0"), Operand::var("int0")]);
        assert_eq!(
            case.assertion,
            Assertion::Equals {
                expected: Operand::var("int1"),
                actual: "result".to_string(),
                tolerance: None,
            }
        );
        assert!(matches!(
            &case.statements[1],
            Statement::Declare {
                expression: Expression::Literal {
                    value: Literal::Int(4),
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_self_referencing_array_is_declared_once() {
        let catalog = catalog();
        let mut trace = ExecutionTrace::new();
        let looped = ObservedValue::Sequence {
            ty: "java.lang.Object[]".to_string(),
            identity: Some(1),
            components: vec![ObservedValue::BackRef { identity: 1 }],
        };
        let array = trace.intern(&looped).unwrap();
        let first = trace
            .record_execution(catalog.method(MethodId(2)).unwrap(), None, vec![array], None)
            .unwrap();
        trace
            .complete_execution(first, Some(trace.null_value()), None)
            .unwrap();

        let plan = plan_for(&catalog, &mut trace, first);
        let case = TestAssembler::new(catalog.clone(), 1e-6)
            .assemble(&trace, &plan, 3)
            .unwrap();
        assert_eq!(case.declaration_counts().get(&array), Some(&1));
        assert!(case.statements.contains(&Statement::SetElement {
            array: "objectArray0".to_string(),
            index: 0,
            value: Operand::var("objectArray0"),
        }));
        assert_eq!(
            case.assertion,
            Assertion::Equals {
                expected: Operand::Null {
                    ty: "java.lang.Object".to_string()
                },
                actual: "result".to_string(),
                tolerance: None,
            }
        );
    }

    #[test]
    fn test_name_stems() {
        assert_eq!(name_stem("com.acme.Counter"), "counter");
        assert_eq!(name_stem("int[][]"), "intArray");
        assert_eq!(name_stem("com.acme.Outer$Inner"), "outer_Inner");
        assert_eq!(name_stem("java.lang.String"), "string");
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut state = AssemblyState::Setup;
        assert!(advance(&mut state, AssemblyState::Invoked).is_err());
        advance(&mut state, AssemblyState::ParamsResolved).unwrap();
        assert_eq!(state, AssemblyState::ParamsResolved);
    }
}
