//! Type catalog port - method descriptors and structural type facts.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MethodDescriptor, MethodId, MethodKind, TypeInfo};

/// Lookup of method descriptors and type facts supplied by the
/// instrumentation collaborator.
pub trait TypeCatalog: Send + Sync {
    /// Descriptor of a method id.
    fn method(&self, id: MethodId) -> Option<&MethodDescriptor>;

    /// Structural facts about a type, if the collaborator described it.
    fn type_info(&self, name: &str) -> Option<&TypeInfo>;

    /// The method a call of `method` actually dispatches to on a receiver
    /// whose dynamic type is `runtime_type`.
    fn resolve_virtual(&self, runtime_type: &str, method: &MethodDescriptor) -> Option<MethodId>;

    /// Whether a test double can stand in for a value of this type.
    fn is_mockable(&self, type_name: &str) -> bool;

    /// Whether the type comes from a dependency rather than the unit under
    /// test. Undescribed types are treated as library types.
    fn is_library_type(&self, type_name: &str) -> bool {
        self.type_info(type_name).is_none_or(|info| info.is_library)
    }

    /// Like [`TypeCatalog::method`], failing with `UnknownMethod`.
    fn require_method(&self, id: MethodId) -> DomainResult<&MethodDescriptor> {
        self.method(id).ok_or(DomainError::UnknownMethod(id))
    }

    /// Declared constructors of a type.
    fn constructors_of(&self, type_name: &str) -> Vec<&MethodDescriptor> {
        self.type_info(type_name)
            .map(|info| {
                info.constructors
                    .iter()
                    .filter_map(|id| self.method(*id))
                    .filter(|m| m.kind == MethodKind::Constructor)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Static no-argument methods of a type that return exactly that type.
    fn static_factories_of(&self, type_name: &str) -> Vec<&MethodDescriptor> {
        self.type_info(type_name)
            .map(|info| {
                info.methods
                    .iter()
                    .filter_map(|id| self.method(*id))
                    .filter(|m| {
                        m.kind == MethodKind::Static
                            && m.param_types.is_empty()
                            && m.return_type == type_name
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
