//! Value model for recorded runtime values.
//!
//! Every value seen in a trace is a [`VarDetail`]: a stable [`ValueId`] plus
//! a [`ValueKind`]. Composite kinds refer to their children by id, so object
//! graphs with cycles are represented without owning references; walkers
//! carry an explicit visited set keyed by id.
//!
//! [`ObservedValue`] is the owned tree form used at the boundaries: the
//! instrumentation hands observed values to the recorder, and the replay
//! runtime reports outcomes in the same shape.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use super::method::{array_dimensions, is_wrapper_type};
use super::ValueId;

/// Type name used for string values.
pub const STRING_TYPE: &str = "java.lang.String";
/// Type name used for class literal values.
pub const CLASS_TYPE: &str = "java.lang.Class";
/// Type name used for the null value.
pub const OBJECT_TYPE: &str = "java.lang.Object";

/// Literal payload of a primitive or boxed primitive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Char(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
        }
    }
}

impl Literal {
    /// Equality with an absolute tolerance for floating point payloads.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() || b.is_nan() {
                    a.is_nan() && b.is_nan()
                } else {
                    a == b || (a - b).abs() <= tolerance
                }
            }
            _ => self == other,
        }
    }

    /// Zero value used when defaulting an argument of primitive type.
    pub fn zero_for(type_name: &str) -> Option<Self> {
        match type_name {
            "boolean" | "java.lang.Boolean" => Some(Self::Bool(false)),
            "char" | "java.lang.Character" => Some(Self::Char('\0')),
            "byte" | "short" | "int" | "long" | "java.lang.Byte" | "java.lang.Short"
            | "java.lang.Integer" | "java.lang.Long" => Some(Self::Int(0)),
            "float" | "double" | "java.lang.Float" | "java.lang.Double" => Some(Self::Float(0.0)),
            _ => None,
        }
    }

    /// Fingerprint fragment used for interning.
    fn fingerprint(&self) -> String {
        match self {
            Self::Bool(v) => format!("b:{v}"),
            Self::Char(v) => format!("c:{}", *v as u32),
            Self::Int(v) => format!("i:{v}"),
            Self::Float(v) => format!("f:{:x}", v.to_bits()),
        }
    }
}

/// How a value comes into existence in a generated test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationKind {
    ByConstructor,
    DirectAssign,
}

/// Opaque snapshot reference of an object's recorded state.
///
/// Two object values are equal iff their snapshots are equal; the content is
/// owned by the serialization collaborator and never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(pub String);

/// The closed set of value variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    /// The distinguished null value.
    Null,
    /// Primitive or boxed primitive; `ty` tells which.
    Primitive { ty: String, literal: Literal },
    Str { text: String },
    /// Mutable string buffer built from the string value `source`.
    StringBuffer {
        ty: String,
        text: String,
        source: ValueId,
    },
    EnumConstant { ty: String, name: String },
    /// A `Class` literal naming a fully qualified type.
    ClassLiteral { name: String },
    /// Array or collection, components in order.
    Sequence { ty: String, components: Vec<ValueId> },
    Map {
        ty: String,
        entries: Vec<(ValueId, ValueId)>,
    },
    Object {
        ty: String,
        snapshot: SnapshotRef,
        /// Field values recorded with the snapshot, used to rebuild private state.
        #[serde(default)]
        fields: BTreeMap<String, ValueId>,
    },
    /// Test double standing in for a value of `ty`.
    Mock { ty: String },
}

impl ValueKind {
    /// Runtime type of the value.
    pub fn ty(&self) -> &str {
        match self {
            Self::Null => OBJECT_TYPE,
            Self::Str { .. } => STRING_TYPE,
            Self::ClassLiteral { .. } => CLASS_TYPE,
            Self::Primitive { ty, .. }
            | Self::StringBuffer { ty, .. }
            | Self::EnumConstant { ty, .. }
            | Self::Sequence { ty, .. }
            | Self::Map { ty, .. }
            | Self::Object { ty, .. }
            | Self::Mock { ty } => ty,
        }
    }

    /// How the value comes into being in a test.
    pub fn creation(&self) -> CreationKind {
        match self {
            Self::Sequence { .. } | Self::Map { .. } | Self::Object { .. } => {
                CreationKind::ByConstructor
            }
            _ => CreationKind::DirectAssign,
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Sequences whose type has array dimensions.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Sequence { ty, .. } if array_dimensions(ty) > 0)
    }

    /// Primitive wrapper values.
    pub fn is_boxed(&self) -> bool {
        matches!(self, Self::Primitive { ty, .. } if is_wrapper_type(ty))
    }

    /// Values rebuilt from an inline literal without any construction.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Self::Null
                | Self::Primitive { .. }
                | Self::Str { .. }
                | Self::EnumConstant { .. }
                | Self::ClassLiteral { .. }
        )
    }

    /// Reference-typed values that may need construction or a test double.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Sequence { .. } | Self::Map { .. } | Self::Object { .. }
        )
    }

    /// Ids directly referenced by this value.
    pub fn children(&self) -> Vec<ValueId> {
        match self {
            Self::Sequence { components, .. } => components.clone(),
            Self::Map { entries, .. } => entries.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            Self::Object { fields, .. } => fields.values().copied().collect(),
            Self::StringBuffer { source, .. } => vec![*source],
            _ => Vec::new(),
        }
    }
}

/// A recorded value with its stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDetail {
    pub id: ValueId,
    #[serde(flatten)]
    pub kind: ValueKind,
}

impl VarDetail {
    /// Pair an id with its recorded shape.
    pub fn new(id: ValueId, kind: ValueKind) -> Self {
        Self { id, kind }
    }

    /// Runtime type name.
    pub fn ty(&self) -> &str {
        self.kind.ty()
    }
}

/// Key/value pair of an observed map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedEntry {
    pub key: ObservedValue,
    pub value: ObservedValue,
}

/// Owned, tree-shaped form of a runtime value at the recording and replay
/// boundaries. Reference values may carry an `identity` token; a cycle is
/// expressed with [`ObservedValue::BackRef`] pointing at an enclosing
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservedValue {
    Null,
    Primitive {
        #[serde(rename = "type")]
        ty: String,
        value: Literal,
    },
    String {
        text: String,
    },
    StringBuffer {
        #[serde(rename = "type")]
        ty: String,
        text: String,
        #[serde(default)]
        identity: Option<u64>,
    },
    Enum {
        #[serde(rename = "type")]
        ty: String,
        name: String,
    },
    Class {
        name: String,
    },
    Sequence {
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        identity: Option<u64>,
        #[serde(default)]
        components: Vec<ObservedValue>,
    },
    Map {
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        identity: Option<u64>,
        #[serde(default)]
        entries: Vec<ObservedEntry>,
    },
    Object {
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        identity: Option<u64>,
        snapshot: String,
        #[serde(default)]
        fields: BTreeMap<String, ObservedValue>,
    },
    BackRef {
        identity: u64,
    },
}

impl ObservedValue {
    /// An observed `int`.
    pub fn int(value: i64) -> Self {
        Self::Primitive {
            ty: "int".to_string(),
            value: Literal::Int(value),
        }
    }

    /// An observed string.
    pub fn string(text: impl Into<String>) -> Self {
        Self::String { text: text.into() }
    }

    /// Runtime identity of reference values and back-references.
    pub fn identity(&self) -> Option<u64> {
        match self {
            Self::StringBuffer { identity, .. }
            | Self::Sequence { identity, .. }
            | Self::Map { identity, .. }
            | Self::Object { identity, .. } => *identity,
            Self::BackRef { identity } => Some(*identity),
            _ => None,
        }
    }

    /// Runtime type name of the observed value.
    pub fn ty(&self) -> &str {
        match self {
            Self::Null | Self::BackRef { .. } => OBJECT_TYPE,
            Self::String { .. } => STRING_TYPE,
            Self::Class { .. } => CLASS_TYPE,
            Self::Primitive { ty, .. }
            | Self::StringBuffer { ty, .. }
            | Self::Enum { ty, .. }
            | Self::Sequence { ty, .. }
            | Self::Map { ty, .. }
            | Self::Object { ty, .. } => ty,
        }
    }

    /// Deterministic content fingerprint. Back references render as `^id`
    /// so cyclic trees fingerprint in finite time.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Primitive { ty, value } => format!("{ty}={}", value.fingerprint()),
            Self::String { text } => format!("s{}:{text}", text.len()),
            Self::StringBuffer { ty, text, .. } => format!("{ty}<{}:{text}>", text.len()),
            Self::Enum { ty, name } => format!("{ty}::{name}"),
            Self::Class { name } => format!("class:{name}"),
            Self::Sequence { ty, components, .. } => {
                let inner: Vec<String> = components.iter().map(Self::fingerprint).collect();
                format!("{ty}[{}]", inner.join(","))
            }
            Self::Map { ty, entries, .. } => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{}=>{}", e.key.fingerprint(), e.value.fingerprint()))
                    .collect();
                format!("{ty}{{{}}}", inner.join(","))
            }
            Self::Object { ty, snapshot, .. } => format!("{ty}@{snapshot}"),
            Self::BackRef { identity } => format!("^{identity}"),
        }
    }

    /// Content equality per the value model: constants by content, containers
    /// by type and children, objects by snapshot. Floating point literals are
    /// compared with `tolerance`.
    pub fn matches(&self, other: &Self, tolerance: f64) -> bool {
        let mut visited = HashSet::new();
        self.matches_inner(other, tolerance, &mut visited)
    }

    fn matches_inner(
        &self,
        other: &Self,
        tolerance: f64,
        visited: &mut HashSet<(u64, u64)>,
    ) -> bool {
        if let (Some(a), Some(b)) = (self.identity(), other.identity()) {
            // A pair already under comparison is assumed equal; the
            // enclosing comparison decides.
            if !visited.insert((a, b)) {
                return true;
            }
        }
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::BackRef { .. }, Self::BackRef { .. }) => true,
            (Self::Primitive { value: a, .. }, Self::Primitive { value: b, .. }) => {
                a.approx_eq(b, tolerance)
            }
            (Self::String { text: a }, Self::String { text: b }) => a == b,
            (
                Self::StringBuffer { ty: ta, text: a, .. },
                Self::StringBuffer { ty: tb, text: b, .. },
            ) => ta == tb && a == b,
            (Self::Enum { ty: ta, name: a }, Self::Enum { ty: tb, name: b }) => {
                ta == tb && a == b
            }
            (Self::Class { name: a }, Self::Class { name: b }) => a == b,
            (
                Self::Sequence {
                    ty: ta,
                    components: a,
                    ..
                },
                Self::Sequence {
                    ty: tb,
                    components: b,
                    ..
                },
            ) => {
                ta == tb
                    && a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x.matches_inner(y, tolerance, visited))
            }
            (
                Self::Map {
                    ty: ta, entries: a, ..
                },
                Self::Map {
                    ty: tb, entries: b, ..
                },
            ) => {
                ta == tb
                    && a.len() == b.len()
                    && a.iter().all(|ea| {
                        b.iter().any(|eb| {
                            ea.key.matches_inner(&eb.key, tolerance, visited)
                                && ea.value.matches_inner(&eb.value, tolerance, visited)
                        })
                    })
            }
            (
                Self::Object {
                    ty: ta,
                    snapshot: a,
                    ..
                },
                Self::Object {
                    ty: tb,
                    snapshot: b,
                    ..
                },
            ) => ta == tb && a == b,
            _ => false,
        }
    }
}
