//! Named table of stage handles.
//!
//! The registry is the single owner of every stage. Everything else (chain, linker,
//! controller) refers to stages by name and looks them up here.

use std::collections::HashMap;

use crate::stage::{Stage, StageDescriptor};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("stage {0:?} is already registered")]
    DuplicateStage(String),
    #[error("stage {0:?} is not registered")]
    UnknownStage(String),
}

/// Arena of stages indexed by name, kept in registration order.
#[derive(Default)]
pub struct StageRegistry {
    slots: Vec<Option<Box<dyn Stage>>>,
    index: HashMap<String, usize>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `stage` under its descriptor name. At most one stage per name.
    pub fn register(&mut self, stage: Box<dyn Stage>) -> Result<(), RegistryError> {
        let name = stage.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateStage(name));
        }
        self.slots.push(Some(stage));
        self.index.insert(name, self.slots.len() - 1);
        Ok(())
    }

    /// Remove a stage and hand ownership back to the caller for release.
    pub fn unregister(&mut self, name: &str) -> Result<Box<dyn Stage>, RegistryError> {
        let slot = self
            .index
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))?;
        self.slots[slot]
            .take()
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Stage> {
        let slot = *self.index.get(name)?;
        self.slots[slot].as_deref()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Stage + 'static)> {
        let slot = *self.index.get(name)?;
        self.slots[slot].as_deref_mut()
    }

    /// Like [`get_mut`](Self::get_mut) but reports unknown names as an error.
    pub fn require_mut(&mut self, name: &str) -> Result<&mut (dyn Stage + 'static), RegistryError> {
        self.get_mut(name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Option<&StageDescriptor> {
        self.get(name).map(|s| s.descriptor())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
