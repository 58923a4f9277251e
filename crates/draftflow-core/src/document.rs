//! The local in-memory scene graph.

use crate::scene::{ObjectId, SceneObject};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All live objects of one replica, keyed by id.
///
/// Paint order is not stored separately: it is derived from each object's
/// `z_index`, with the id breaking ties so every replica agrees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    objects: HashMap<ObjectId, SceneObject>,
}

impl SceneDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object. Returns the previous version.
    pub fn insert(&mut self, object: SceneObject) -> Option<SceneObject> {
        self.objects.insert(object.id(), object)
    }

    /// Remove an object from the document.
    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    /// Objects in paint order (back to front).
    pub fn objects_back_to_front(&self) -> Vec<&SceneObject> {
        let mut ordered: Vec<&SceneObject> = self.objects.values().collect();
        ordered.sort_by_key(|o| (o.z_index, o.id()));
        ordered
    }

    /// Objects in hit-test priority (topmost first).
    pub fn objects_top_down(&self) -> Vec<&SceneObject> {
        let mut ordered = self.objects_back_to_front();
        ordered.reverse();
        ordered
    }

    /// Highest z-index in use, if any object exists.
    pub fn max_z(&self) -> Option<i64> {
        self.objects.values().map(|o| o.z_index).max()
    }

    pub fn min_z(&self) -> Option<i64> {
        self.objects.values().map(|o| o.z_index).min()
    }

    /// Check if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Get the number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Serialize the objects, in paint order, to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.objects_back_to_front())
    }
}
