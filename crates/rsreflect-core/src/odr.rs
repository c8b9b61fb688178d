//! Cross-file record definitions
//!
//! The first file to export a record fixes its layout for the whole batch.
//! The registry owns copies of those definitions in its own arena, so they
//! outlive the per-file context that created them.

use std::collections::HashMap;

use crate::api::PointerWidth;
use crate::error::CoreError;
use crate::types::{EqualityMode, TypeArena, TypeClass, TypeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDefinition {
    /// Node in the registry's arena
    pub node: TypeId,
    /// File that first exported the record
    pub file: String,
}

#[derive(Debug, Clone)]
pub struct DefinitionRegistry {
    arena: TypeArena,
    entries: HashMap<String, RegisteredDefinition>,
    order: Vec<String>,
}

impl DefinitionRegistry {
    pub fn new(pointer_width: PointerWidth) -> Self {
        Self {
            arena: TypeArena::new(pointer_width),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn arena(&self) -> &TypeArena {
        &self.arena
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredDefinition> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered definitions in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredDefinition)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|def| (name.as_str(), def)))
    }

    /// Registers the record `id` of `arena`, or compares it with the
    /// definition already registered under the same name.
    ///
    /// Returns `Ok(true)` when the record was new to the batch and
    /// `Ok(false)` when an identical definition was already known.
    pub fn check(&mut self, file: &str, arena: &TypeArena, id: TypeId) -> Result<bool, CoreError> {
        let node = arena.get(id);
        if node.class() != TypeClass::Record {
            return Err(CoreError::Internal(format!(
                "definition check on non-record type '{}'",
                node.name()
            )));
        }
        let name = node.name();

        if let Some(existing) = self.entries.get(name) {
            if TypeArena::equals_across(&self.arena, existing.node, arena, id, EqualityMode::FieldNames) {
                return Ok(false);
            }
            return Err(CoreError::DefinitionConflict {
                type_name: name.to_string(),
                file: file.to_string(),
                first_file: existing.file.clone(),
            });
        }

        let known: HashMap<String, TypeId> = self
            .entries
            .iter()
            .map(|(name, def)| (name.clone(), def.node))
            .collect();
        let copy = self.arena.adopt(arena, id, &known);
        tracing::debug!(record = %name, file = %file, "registered definition");
        self.entries.insert(
            name.to_string(),
            RegisteredDefinition {
                node: copy,
                file: file.to_string(),
            },
        );
        self.order.push(name.to_string());
        Ok(true)
    }

    /// Drops every registered definition. Returns how many there were.
    pub fn teardown(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.arena = TypeArena::new(self.arena.pointer_width());
        count
    }
}
