//! Assembled test cases: ordered statements plus a final assertion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::Literal;
use super::{ExecutionId, MethodId, ValueId};

/// Something a statement can refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// A previously declared variable.
    Var { name: String },
    /// A null literal, cast to `ty` where overloads need it.
    Null { ty: String },
}

impl Operand {
    /// Reference to a declared variable.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    /// Variable name, unless the operand is null.
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Self::Var { name } => Some(name),
            Self::Null { .. } => None,
        }
    }
}

/// A method, constructor or static call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub method: MethodId,
    pub declaring_type: String,
    pub name: String,
    /// `None` for static calls and constructors.
    pub receiver: Option<Operand>,
    /// Arguments in declaration order.
    pub args: Vec<Operand>,
    /// Emit as `new` expression.
    pub constructor: bool,
}

/// Right-hand side of a declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal { ty: String, value: Literal },
    Str { text: String },
    EnumConstant { ty: String, name: String },
    ClassLiteral { name: String },
    /// New array of `length` elements.
    NewArray { ty: String, length: usize },
    /// New empty collection or map of a concrete type.
    NewContainer { ty: String },
    /// New string buffer initialised from a string variable.
    NewStringBuffer { ty: String, source: Operand },
    Invoke { call: Call },
    /// A fresh test double.
    Mock { ty: String },
}

/// How a stubbed call matches its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgMatcher {
    Exact { value: Operand },
    Any { ty: String },
}

/// What a stubbed call does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StubAnswer {
    Returns { value: Operand },
    Throws { exception: String },
    DoNothing,
}

/// One setup statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// `ty name = expression;`, materializing `value`.
    Declare {
        name: String,
        ty: String,
        value: ValueId,
        expression: Expression,
    },
    /// A call whose result is discarded, e.g. a mutating member call.
    Call { call: Call },
    /// `array[index] = value;`
    SetElement {
        array: String,
        index: usize,
        value: Operand,
    },
    /// `collection.add(value);`
    AddElement { collection: String, value: Operand },
    /// `map.put(key, value);`
    PutEntry {
        map: String,
        key: Operand,
        value: Operand,
    },
    /// Reflective write of a field that the observed subtree reads.
    SetField {
        target: String,
        owner_type: String,
        field: String,
        value: Operand,
    },
    /// Stub registration on a test double.
    Stub {
        mock: String,
        method: MethodId,
        name: String,
        matchers: Vec<ArgMatcher>,
        answer: StubAnswer,
    },
}

impl Statement {
    /// Value materialized by this statement, if it is a declaration.
    pub fn declared_value(&self) -> Option<ValueId> {
        match self {
            Self::Declare { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Final check of a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    /// `assertEquals(expected, actual[, tolerance])`.
    Equals {
        expected: Operand,
        actual: String,
        tolerance: Option<f64>,
    },
    /// The target call must throw `exception`.
    Throws { exception: String },
}

/// Kind of assertion, reported to the packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Value,
    Exception,
}

impl AssertionKind {
    /// Stable lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Exception => "exception",
        }
    }
}

/// Progress of assembling one target execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyState {
    Setup,
    ParamsResolved,
    CalleeResolved,
    Invoked,
    Asserted,
    ExceptionAsserted,
}

impl AssemblyState {
    /// Stable lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::ParamsResolved => "params_resolved",
            Self::CalleeResolved => "callee_resolved",
            Self::Invoked => "invoked",
            Self::Asserted => "asserted",
            Self::ExceptionAsserted => "exception_asserted",
        }
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<AssemblyState> {
        match self {
            Self::Setup => vec![Self::ParamsResolved],
            Self::ParamsResolved => vec![Self::CalleeResolved],
            Self::CalleeResolved => vec![Self::Invoked],
            Self::Invoked => vec![Self::Asserted, Self::ExceptionAsserted],
            Self::Asserted | Self::ExceptionAsserted => vec![],
        }
    }

    /// Whether `next` directly follows this state.
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// No further statements may be added.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Asserted | Self::ExceptionAsserted)
    }
}

/// A generated regression test for one target execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Method name of the generated test.
    pub name: String,
    pub target: ExecutionId,
    /// Declaring type of the target method.
    pub class_under_test: String,
    /// Package the test must be declared in; empty means any.
    pub required_package: String,
    pub statements: Vec<Statement>,
    /// The call under test.
    pub invocation: Call,
    /// Variable receiving the target's result, for value assertions.
    pub result_variable: Option<(String, String)>,
    pub assertion: Assertion,
    /// Value id → variable name holding it.
    pub bindings: BTreeMap<ValueId, String>,
    /// Owning test of the original observation.
    pub source_test: Option<String>,
    #[serde(skip)]
    recreated: bool,
}

impl TestCase {
    /// Assembled case, not yet verified.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        target: ExecutionId,
        class_under_test: String,
        required_package: String,
        statements: Vec<Statement>,
        invocation: Call,
        result_variable: Option<(String, String)>,
        assertion: Assertion,
        bindings: BTreeMap<ValueId, String>,
        source_test: Option<String>,
    ) -> Self {
        Self {
            name,
            target,
            class_under_test,
            required_package,
            statements,
            invocation,
            result_variable,
            assertion,
            bindings,
            source_test,
            recreated: false,
        }
    }

    /// Kind of the final assertion.
    pub fn assertion_kind(&self) -> AssertionKind {
        match self.assertion {
            Assertion::Equals { .. } => AssertionKind::Value,
            Assertion::Throws { .. } => AssertionKind::Exception,
        }
    }

    /// Whether a live replay reproduced the observed outcome. A case must not
    /// be emitted unless this is true.
    pub fn is_recreated(&self) -> bool {
        self.recreated
    }

    pub(crate) fn mark_recreated(&mut self) {
        self.recreated = true;
    }

    /// Number of declaration statements for each value id.
    pub fn declaration_counts(&self) -> BTreeMap<ValueId, usize> {
        let mut counts = BTreeMap::new();
        for value in self.statements.iter().filter_map(Statement::declared_value) {
            *counts.entry(value).or_insert(0) += 1;
        }
        counts
    }

    /// Value ids replaced by test doubles.
    pub fn mocked_values(&self) -> Vec<ValueId> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Declare {
                    value,
                    expression: Expression::Mock { .. },
                    ..
                } => Some(*value),
                _ => None,
            })
            .collect()
    }
}
