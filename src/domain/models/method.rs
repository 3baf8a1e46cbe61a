//! Method and type descriptors supplied by the instrumentation collaborator.

use serde::{Deserialize, Serialize};

use super::MethodId;

/// Declared access level of a method, constructor, type or field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

impl AccessLevel {
    /// Rank used when ordering construction candidates. Lower is more accessible.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Protected => 1,
            Self::Package => 2,
            Self::Private => 3,
        }
    }

    /// Java keyword, or `package` for the default level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Package => "package",
            Self::Private => "private",
        }
    }
}

/// What kind of callable a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Static,
    Member,
    Constructor,
    StaticInitializer,
}

impl MethodKind {
    /// Stable lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Member => "member",
            Self::Constructor => "constructor",
            Self::StaticInitializer => "static-initializer",
        }
    }

    /// Whether a call of this kind carries a receiver.
    pub fn has_receiver(&self) -> bool {
        matches!(self, Self::Member)
    }
}

/// Descriptor of an invokable method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub id: MethodId,
    pub declaring_type: String,
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default = "default_return_type")]
    pub return_type: String,
    #[serde(default)]
    pub access: AccessLevel,
    pub kind: MethodKind,
    /// Compiler-generated bridge or accessor.
    #[serde(default)]
    pub synthetic: bool,
}

fn default_return_type() -> String {
    "void".to_string()
}

impl MethodDescriptor {
    /// Whether the method returns nothing.
    pub fn is_void(&self) -> bool {
        self.return_type == "void"
    }

    /// Whether the descriptor names a constructor.
    pub fn is_constructor(&self) -> bool {
        self.kind == MethodKind::Constructor
    }

    /// Name plus parameter list, e.g. `add(int,int)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.param_types.join(","))
    }

    /// Whether this method is one of the identity-sensitive object methods
    /// that a test double cannot answer faithfully.
    pub fn is_identity_sensitive(&self) -> bool {
        matches!(
            (self.name.as_str(), self.param_types.len()),
            ("equals", 1) | ("hashCode", 0) | ("getClass", 0)
        )
    }
}

/// Declared field of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub access: AccessLevel,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
}

/// Structural facts about a type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    #[serde(default)]
    pub access: AccessLevel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub is_enum: bool,
    /// Type comes from a dependency rather than the unit under test.
    #[serde(default)]
    pub is_library: bool,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    /// Constructors declared by the type.
    #[serde(default)]
    pub constructors: Vec<MethodId>,
    /// Static and member methods declared by the type.
    #[serde(default)]
    pub methods: Vec<MethodId>,
}

impl TypeInfo {
    /// A public, concrete type with no members.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Package part of the type name.
    pub fn package(&self) -> &str {
        package_of(&self.name)
    }

    /// Declared field called `name`.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Package portion of a fully qualified type name; empty for the default package.
pub fn package_of(type_name: &str) -> &str {
    let base = type_name.trim_end_matches("[]");
    match base.rfind('.') {
        Some(idx) => &base[..idx],
        None => "",
    }
}

/// Simple (unqualified) name of a type, keeping array brackets.
pub fn simple_name(type_name: &str) -> &str {
    match type_name.rfind('.') {
        Some(idx) => &type_name[idx + 1..],
        None => type_name,
    }
}

/// Number of array dimensions in a type name, e.g. 2 for `int[][]`.
pub fn array_dimensions(type_name: &str) -> usize {
    type_name.matches("[]").count()
}

/// Component type of an array type, or `None` for non-array types.
pub fn component_type(type_name: &str) -> Option<&str> {
    type_name.strip_suffix("[]")
}

/// Whether a type name denotes a primitive.
pub fn is_primitive_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "boolean" | "byte" | "char" | "short" | "int" | "long" | "float" | "double"
    )
}

/// Whether a type name denotes a boxed primitive.
pub fn is_wrapper_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "java.lang.Boolean"
            | "java.lang.Byte"
            | "java.lang.Character"
            | "java.lang.Short"
            | "java.lang.Integer"
            | "java.lang.Long"
            | "java.lang.Float"
            | "java.lang.Double"
    )
}

/// Whether a type name denotes a floating point primitive or wrapper.
pub fn is_floating_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "float" | "double" | "java.lang.Float" | "java.lang.Double"
    )
}
