//! In-memory type catalog.
//!
//! Built from the type section of a trace document, or programmatically in
//! tests. Virtual dispatch is resolved by walking the superclass chain of
//! the receiver's runtime type.

use std::collections::{HashMap, HashSet};

use crate::domain::models::method::{array_dimensions, is_primitive_type, is_wrapper_type};
use crate::domain::models::value::STRING_TYPE;
use crate::domain::models::{MethodDescriptor, MethodId, MethodKind, TypeInfo};
use crate::domain::ports::TypeCatalog;

/// Upper bound on superclass chain length, guarding against malformed
/// catalogs with inheritance cycles.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Type catalog held in memory, filled from a trace document.
#[derive(Debug, Clone, Default)]
pub struct StaticTypeCatalog {
    types: HashMap<String, TypeInfo>,
    methods: HashMap<MethodId, MethodDescriptor>,
    unmockable: HashSet<String>,
}

impl StaticTypeCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Types that must never be replaced by a test double, in addition to
    /// final types, enums and value types.
    pub fn with_unmockable<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unmockable.extend(types.into_iter().map(Into::into));
        self
    }

    /// Register or replace a type.
    pub fn add_type(&mut self, info: TypeInfo) {
        self.types.insert(info.name.clone(), info);
    }

    /// Register a method. If its declaring type is known, the method is also
    /// listed on that type.
    pub fn add_method(&mut self, method: MethodDescriptor) {
        if let Some(owner) = self.types.get_mut(&method.declaring_type) {
            let list = if method.kind == MethodKind::Constructor {
                &mut owner.constructors
            } else {
                &mut owner.methods
            };
            if !list.contains(&method.id) {
                list.push(method.id);
            }
        }
        self.methods.insert(method.id, method);
    }

    /// Registered types.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Registered methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    fn overrides(candidate: &MethodDescriptor, method: &MethodDescriptor) -> bool {
        candidate.kind == MethodKind::Member
            && candidate.name == method.name
            && candidate.param_types == method.param_types
    }
}

impl TypeCatalog for StaticTypeCatalog {
    fn method(&self, id: MethodId) -> Option<&MethodDescriptor> {
        self.methods.get(&id)
    }

    fn type_info(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    fn resolve_virtual(&self, runtime_type: &str, method: &MethodDescriptor) -> Option<MethodId> {
        let mut current = Some(runtime_type.to_string());
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let name = current?;
            if name == method.declaring_type {
                return Some(method.id);
            }
            let info = self.types.get(&name)?;
            let found = info
                .methods
                .iter()
                .filter_map(|id| self.methods.get(id))
                .find(|candidate| Self::overrides(candidate, method));
            if let Some(found) = found {
                return Some(found.id);
            }
            current = info.superclass.clone();
        }
        None
    }

    fn is_mockable(&self, type_name: &str) -> bool {
        if array_dimensions(type_name) > 0
            || is_primitive_type(type_name)
            || is_wrapper_type(type_name)
            || type_name == STRING_TYPE
            || self.unmockable.contains(type_name)
        {
            return false;
        }
        // Undescribed types may be final; only described ones are doubled.
        self.types
            .get(type_name)
            .is_some_and(|info| !info.is_final && !info.is_enum)
    }
}
