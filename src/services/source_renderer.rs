//! Renders packed test files as JVM unit-test source.
//!
//! Output targets JUnit 5 with Mockito for test doubles. Stubs use the
//! `doReturn(..).when(mock).m(..)` form so void and non-void methods render
//! the same way. A case that was not recreated is refused.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::method::{array_dimensions, is_primitive_type};
use crate::domain::models::{
    ArgMatcher, Assertion, Call, Expression, Literal, Operand, Statement, StubAnswer, TestCase,
};
use crate::services::suite_packer::TestFile;

const INDENT: &str = "    ";

/// Source form of a type name. Nested types use `.` instead of `$`.
fn java_type(type_name: &str) -> String {
    type_name.replace('$', ".")
}

fn escape_char(c: char, quote: char) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\t' => "\\t".to_string(),
        '\0' => "\\0".to_string(),
        c if c == quote => format!("\\{c}"),
        c if c.is_control() || !c.is_ascii() => {
            let mut units = [0u16; 2];
            c.encode_utf16(&mut units)
                .iter()
                .map(|u| format!("\\u{u:04x}"))
                .collect()
        }
        c => c.to_string(),
    }
}

fn string_literal(text: &str) -> String {
    let body: String = text.chars().map(|c| escape_char(c, '"')).collect();
    format!("\"{body}\"")
}

/// Primitive a declared type unboxes to, for literal suffixes.
fn unboxed(type_name: &str) -> &str {
    match type_name {
        "java.lang.Boolean" => "boolean",
        "java.lang.Byte" => "byte",
        "java.lang.Character" => "char",
        "java.lang.Short" => "short",
        "java.lang.Integer" => "int",
        "java.lang.Long" => "long",
        "java.lang.Float" => "float",
        "java.lang.Double" => "double",
        other => other,
    }
}

fn float_literal(value: f64, single: bool) -> String {
    let (boxed, suffix) = if single { ("Float", "f") } else { ("Double", "d") };
    if value.is_nan() {
        format!("{boxed}.NaN")
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "POSITIVE" } else { "NEGATIVE" };
        format!("{boxed}.{sign}_INFINITY")
    } else {
        format!("{value:?}{suffix}")
    }
}

fn literal(ty: &str, value: &Literal) -> String {
    let primitive = unboxed(ty);
    match value {
        Literal::Bool(v) => v.to_string(),
        Literal::Char(c) => format!("'{}'", escape_char(*c, '\'')),
        Literal::Int(v) => match primitive {
            "long" => format!("{v}L"),
            "byte" | "short" => format!("({primitive}) {v}"),
            "float" => format!("{v}.0f"),
            "double" => format!("{v}.0d"),
            _ if *v > i64::from(i32::MAX) || *v < i64::from(i32::MIN) => format!("{v}L"),
            _ => v.to_string(),
        },
        Literal::Float(v) => float_literal(*v, primitive == "float"),
    }
}

fn operand(op: &Operand) -> String {
    match op {
        Operand::Var { name } => name.clone(),
        Operand::Null { ty } => format!("({}) null", java_type(ty)),
    }
}

fn args(ops: &[Operand]) -> String {
    ops.iter().map(operand).collect::<Vec<_>>().join(", ")
}

fn call(call: &Call) -> String {
    let owner = java_type(&call.declaring_type);
    if call.constructor {
        return format!("new {owner}({})", args(&call.args));
    }
    match &call.receiver {
        Some(receiver) => format!("{}.{}({})", operand(receiver), call.name, args(&call.args)),
        None => format!("{owner}.{}({})", call.name, args(&call.args)),
    }
}

fn new_array(ty: &str, length: usize) -> String {
    let dims = array_dimensions(ty);
    let base = java_type(ty.trim_end_matches("[]"));
    let rest = "[]".repeat(dims.saturating_sub(1));
    format!("new {base}[{length}]{rest}")
}

fn expression(expr: &Expression) -> String {
    match expr {
        Expression::Literal { ty, value } => literal(ty, value),
        Expression::Str { text } => string_literal(text),
        Expression::EnumConstant { ty, name } => format!("{}.{name}", java_type(ty)),
        Expression::ClassLiteral { name } => format!("{}.class", java_type(name)),
        Expression::NewArray { ty, length } => new_array(ty, *length),
        Expression::NewContainer { ty } => format!("new {}()", java_type(ty)),
        Expression::NewStringBuffer { ty, source } => {
            format!("new {}({})", java_type(ty), operand(source))
        }
        Expression::Invoke { call: c } => call(c),
        Expression::Mock { ty } => format!("mock({}.class)", java_type(ty)),
    }
}

fn matcher(m: &ArgMatcher) -> String {
    match m {
        ArgMatcher::Exact { value } => format!("eq({})", operand(value)),
        ArgMatcher::Any { ty } if is_primitive_type(ty) => {
            let mut chars = ty.chars();
            let capitalized: String = chars
                .next()
                .map(|c| c.to_ascii_uppercase())
                .into_iter()
                .chain(chars)
                .collect();
            format!("any{capitalized}()")
        }
        ArgMatcher::Any { ty } => format!("any({}.class)", java_type(ty)),
    }
}

fn statement(stmt: &Statement) -> String {
    match stmt {
        Statement::Declare {
            name,
            ty,
            expression: expr,
            ..
        } => format!("{} {name} = {};", java_type(ty), expression(expr)),
        Statement::Call { call: c } => format!("{};", call(c)),
        Statement::SetElement {
            array,
            index,
            value,
        } => format!("{array}[{index}] = {};", operand(value)),
        Statement::AddElement { collection, value } => {
            format!("{collection}.add({});", operand(value))
        }
        Statement::PutEntry { map, key, value } => {
            format!("{map}.put({}, {});", operand(key), operand(value))
        }
        Statement::SetField {
            target,
            owner_type,
            field,
            value,
        } => format!(
            "setField({target}, {}.class, {}, {});",
            java_type(owner_type),
            string_literal(field),
            operand(value)
        ),
        Statement::Stub {
            mock,
            name,
            matchers,
            answer,
            ..
        } => {
            let stubbing = match answer {
                StubAnswer::Returns { value } => format!("doReturn({})", operand(value)),
                StubAnswer::Throws { exception } => {
                    format!("doThrow({}.class)", java_type(exception))
                }
                StubAnswer::DoNothing => "doNothing()".to_string(),
            };
            let matchers = matchers.iter().map(matcher).collect::<Vec<_>>().join(", ");
            format!("{stubbing}.when({mock}).{name}({matchers});")
        }
    }
}

fn is_array_result(case: &TestCase) -> bool {
    case.result_variable
        .as_ref()
        .is_some_and(|(_, ty)| array_dimensions(ty) > 0)
}

/// Body lines of one test method, without indentation.
fn case_body(case: &TestCase) -> Vec<String> {
    let mut lines: Vec<String> = case.statements.iter().map(statement).collect();
    let invocation = call(&case.invocation);
    match &case.assertion {
        Assertion::Equals {
            expected,
            actual,
            tolerance,
        } => {
            if let Some((name, ty)) = &case.result_variable {
                lines.push(format!("{} {name} = {invocation};", java_type(ty)));
            } else {
                lines.push(format!("{invocation};"));
            }
            let check = if is_array_result(case) {
                "assertArrayEquals"
            } else {
                "assertEquals"
            };
            let expected = operand(expected);
            lines.push(match tolerance {
                Some(delta) => format!("{check}({expected}, {actual}, {delta:?});"),
                None => format!("{check}({expected}, {actual});"),
            });
        }
        Assertion::Throws { exception } => {
            lines.push(format!(
                "assertThrows({}.class, () -> {invocation});",
                java_type(exception)
            ));
        }
    }
    lines
}

/// Renders test files as Java source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRenderer;

impl SourceRenderer {
    /// Stateless renderer.
    pub fn new() -> Self {
        Self
    }

    /// Source of one test method.
    pub fn render_case(&self, case: &TestCase) -> DomainResult<String> {
        if !case.is_recreated() {
            return Err(DomainError::UnverifiedCase(case.name.clone()));
        }
        let mut out = String::new();
        if let Some(source) = &case.source_test {
            out.push_str(&format!("{INDENT}// Recorded during {source}\n"));
        }
        out.push_str(&format!("{INDENT}@Test\n"));
        out.push_str(&format!(
            "{INDENT}public void {}() throws Throwable {{\n",
            case.name
        ));
        for line in case_body(case) {
            out.push_str(&format!("{INDENT}{INDENT}{line}\n"));
        }
        out.push_str(&format!("{INDENT}}}\n"));
        Ok(out)
    }

    /// Source of a whole test class.
    pub fn render(&self, file: &TestFile) -> DomainResult<String> {
        let methods = file
            .cases
            .iter()
            .map(|case| self.render_case(case))
            .collect::<DomainResult<Vec<_>>>()?;
        let uses_mocks = file.cases.iter().any(|case| {
            case.statements
                .iter()
                .any(|s| matches!(s, Statement::Stub { .. } | Statement::Declare { expression: Expression::Mock { .. }, .. }))
        });
        let uses_set_field = file
            .cases
            .iter()
            .flat_map(|case| &case.statements)
            .any(|s| matches!(s, Statement::SetField { .. }));

        let mut out = String::new();
        if !file.package.is_empty() {
            out.push_str(&format!("package {};\n\n", file.package));
        }
        out.push_str("import static org.junit.jupiter.api.Assertions.*;\n");
        if uses_mocks {
            out.push_str("import static org.mockito.ArgumentMatchers.*;\n");
            out.push_str("import static org.mockito.Mockito.*;\n");
        }
        out.push('\n');
        out.push_str("import org.junit.jupiter.api.Test;\n\n");
        out.push_str(&format!(
            "/** Regression tests for {{@link {}}} replayed from recorded executions. */\n",
            java_type(&file.class_under_test)
        ));
        out.push_str(&format!("public class {} {{\n", file.class_name));
        for method in methods {
            out.push('\n');
            out.push_str(&method);
        }
        if uses_set_field {
            out.push('\n');
            out.push_str(&format!(
                "{INDENT}private static void setField(Object target, Class<?> owner, String name, Object value)\n"
            ));
            out.push_str(&format!("{INDENT}{INDENT}{INDENT}throws ReflectiveOperationException {{\n"));
            out.push_str(&format!(
                "{INDENT}{INDENT}java.lang.reflect.Field field = owner.getDeclaredField(name);\n"
            ));
            out.push_str(&format!("{INDENT}{INDENT}field.setAccessible(true);\n"));
            out.push_str(&format!("{INDENT}{INDENT}field.set(target, value);\n"));
            out.push_str(&format!("{INDENT}}}\n"));
        }
        out.push_str("}\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExecutionId, MethodId, ValueId};
    use std::collections::BTreeMap;

    fn add_case(recreated: bool) -> TestCase {
        let declare = |name: &str, value: u32, literal: i64| Statement::Declare {
            name: name.to_string(),
            ty: "int".to_string(),
            value: ValueId(value),
            expression: Expression::Literal {
                ty: "int".to_string(),
                value: Literal::Int(literal),
            },
        };
        let mut case = TestCase::new(
            "testAdd0".to_string(),
            ExecutionId(0),
            "com.acme.MathUtil".to_string(),
            String::new(),
            vec![declare("int0", 1, 2), declare("int1", 2, 3), declare("int2", 3, 5)],
            Call {
                method: MethodId(1),
                declaring_type: "com.acme.MathUtil".to_string(),
                name: "add".to_string(),
                receiver: None,
                args: vec![Operand::var("int0"), Operand::var("int1")],
                constructor: false,
            },
            Some(("result".to_string(), "int".to_string())),
            Assertion::Equals {
                expected: Operand::var("int2"),
                actual: "result".to_string(),
                tolerance: None,
            },
            BTreeMap::new(),
            Some("testMath".to_string()),
        );
        if recreated {
            case.mark_recreated();
        }
        case
    }

    #[test]
    fn test_renders_value_assertion() {
        let source = SourceRenderer::new().render_case(&add_case(true)).unwrap();
        assert!(source.contains("// Recorded during testMath"));
        assert!(source.contains("int int0 = 2;"));
        assert!(source.contains("int result = com.acme.MathUtil.add(int0, int1);"));
        assert!(source.contains("assertEquals(int2, result);"));
    }

    #[test]
    fn test_refuses_unrecreated_case() {
        let err = SourceRenderer::new().render_case(&add_case(false)).unwrap_err();
        assert!(matches!(err, DomainError::UnverifiedCase(name) if name == "testAdd0"));
    }

    #[test]
    fn test_renders_class_with_package() {
        let file = TestFile {
            package: "com.acme".to_string(),
            class_name: "MathUtilReplayTest".to_string(),
            class_under_test: "com.acme.MathUtil".to_string(),
            cases: vec![add_case(true)],
        };
        let source = SourceRenderer::new().render(&file).unwrap();
        assert!(source.starts_with("package com.acme;\n"));
        assert!(source.contains("public class MathUtilReplayTest {"));
        assert!(!source.contains("org.mockito"));
        assert!(!source.contains("setField("));
    }

    #[test]
    fn test_statement_forms() {
        let stub = Statement::Stub {
            mock: "clock0".to_string(),
            method: MethodId(4),
            name: "tick".to_string(),
            matchers: vec![
                ArgMatcher::Any {
                    ty: "int".to_string(),
                },
                ArgMatcher::Exact {
                    value: Operand::var("string0"),
                },
            ],
            answer: StubAnswer::Returns {
                value: Operand::var("long0"),
            },
        };
        assert_eq!(
            statement(&stub),
            "doReturn(long0).when(clock0).tick(anyInt(), eq(string0));"
        );
        assert_eq!(new_array("int[][]", 3), "new int[3][]");
        assert_eq!(literal("long", &Literal::Int(7)), "7L");
        assert_eq!(literal("java.lang.Float", &Literal::Float(1.5)), "1.5f");
        assert_eq!(literal("double", &Literal::Float(f64::NAN)), "Double.NaN");
        assert_eq!(string_literal("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(
            operand(&Operand::Null {
                ty: "com.acme.Outer$Inner".to_string()
            }),
            "(com.acme.Outer.Inner) null"
        );
    }
}
