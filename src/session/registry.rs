use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::instance::Instance;
use crate::error::{DeckError, Result};

/// Deleted sessions kept for undo, newest last.
const UNDO_CAP: usize = 10;

/// Owns the session set. Readers take snapshots under the read lock and
/// release it before any blocking work; mutation holds the write lock only
/// for the map/vec surgery.
#[derive(Default)]
pub struct SessionRegistry {
    instances: RwLock<Vec<Arc<Instance>>>,
    by_id: RwLock<HashMap<String, Arc<Instance>>>,
    undo: Mutex<Vec<Arc<Instance>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, instance: Instance) -> Result<Arc<Instance>> {
        let mut by_id = self.by_id.write();
        if by_id.contains_key(&instance.id) {
            return Err(DeckError::InvalidInput(format!(
                "duplicate session id: {}",
                instance.id
            )));
        }

        let title = instance.title();
        let group = instance.group_path();
        let instances = self.instances.read();
        if instances
            .iter()
            .any(|i| i.group_path() == group && i.title() == title)
        {
            return Err(DeckError::DuplicateTitle(title));
        }
        drop(instances);

        let instance = Arc::new(instance);
        by_id.insert(instance.id.clone(), Arc::clone(&instance));
        drop(by_id);
        self.instances.write().push(Arc::clone(&instance));
        Ok(instance)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Instance>> {
        self.by_id.read().get(id).cloned()
    }

    /// Ordered snapshot for flattening and scheduling. Callers must not
    /// hold this across awaits of registry mutation.
    pub fn snapshot(&self) -> Vec<Arc<Instance>> {
        self.instances.read().clone()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Remove a session, pushing it onto the bounded undo stack.
    pub fn remove(&self, id: &str) -> Result<Arc<Instance>> {
        let removed = {
            let mut by_id = self.by_id.write();
            by_id
                .remove(id)
                .ok_or_else(|| DeckError::SessionNotFound(id.to_string()))?
        };
        self.instances.write().retain(|i| i.id != id);

        let mut undo = self.undo.lock();
        undo.push(Arc::clone(&removed));
        if undo.len() > UNDO_CAP {
            undo.remove(0);
        }
        Ok(removed)
    }

    /// Restore the most recently deleted session (LIFO).
    pub fn restore_last_deleted(&self) -> Option<Arc<Instance>> {
        let instance = self.undo.lock().pop()?;

        let mut by_id = self.by_id.write();
        if by_id.contains_key(&instance.id) {
            return None;
        }
        by_id.insert(instance.id.clone(), Arc::clone(&instance));
        drop(by_id);
        self.instances.write().push(Arc::clone(&instance));
        Some(instance)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.lock().len()
    }

    /// Replace the whole set (external reload). Undo history survives.
    pub fn replace_all(&self, new_instances: Vec<Arc<Instance>>) {
        let mut by_id = self.by_id.write();
        let mut instances = self.instances.write();
        by_id.clear();
        for inst in &new_instances {
            by_id.insert(inst.id.clone(), Arc::clone(inst));
        }
        *instances = new_instances;
    }

    /// Status counts for the header line; derived, cached by the caller.
    pub fn status_counts(&self) -> HashMap<crate::session::Status, usize> {
        let mut counts = HashMap::new();
        for inst in self.instances.read().iter() {
            *counts.entry(inst.status()).or_insert(0) += 1;
        }
        counts
    }
}
