//! Per-attribute last-writer-wins merge.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Patch, PatchOp, SceneChange, Stamp, StoreKey};
use crate::document::SceneDocument;
use crate::scene::{Attribute, ObjectId, Property, SceneObject};

/// The winning write of one attribute.
#[derive(Debug, Clone, PartialEq)]
struct Register {
    attribute: Attribute,
    stamp: Stamp,
}

/// Merge state of one object.
#[derive(Debug, Clone, Default)]
struct Entry {
    /// Creation record; `None` while only attribute writes have arrived.
    base: Option<(SceneObject, Stamp)>,
    registers: BTreeMap<Property, Register>,
}

impl Entry {
    /// Store `register` if it beats the current one. Returns whether it won.
    fn offer(&mut self, register: Register) -> bool {
        let property = register.attribute.property();
        match self.registers.get(&property) {
            Some(current) if !register.stamp.supersedes(&current.stamp) => false,
            _ => {
                self.registers.insert(property, register);
                true
            }
        }
    }

    fn materialize(&self) -> Option<SceneObject> {
        let (base, _) = self.base.as_ref()?;
        let mut object = base.clone();
        for register in self.registers.values() {
            if let Err(e) = object.apply_in_place(&register.attribute) {
                log::warn!("Skipping register for {}: {}", object.id(), e);
            }
        }
        Some(object)
    }
}

/// Result of merging one patch.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Created(SceneObject),
    Updated(SceneObject),
    Removed(ObjectId),
    /// Nothing visible changed: a duplicate, a losing write, a write for a
    /// deleted object, or an attribute buffered until its object arrives.
    Unchanged,
}

impl MergeOutcome {
    pub fn into_change(self) -> Option<SceneChange> {
        match self {
            MergeOutcome::Created(o) => Some(SceneChange::Created(o)),
            MergeOutcome::Updated(o) => Some(SceneChange::Updated(o)),
            MergeOutcome::Removed(id) => Some(SceneChange::Removed(id)),
            MergeOutcome::Unchanged => None,
        }
    }
}

/// One participant's replica of the shared scene.
///
/// Merging is commutative and idempotent: any delivery order of the same
/// set of patches, with any duplication, yields the same document.
#[derive(Debug, Clone, Default)]
pub struct SceneReplica {
    entries: HashMap<ObjectId, Entry>,
    tombstones: HashSet<ObjectId>,
    document: SceneDocument,
}

impl SceneReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// The materialized live objects.
    pub fn document(&self) -> &SceneDocument {
        &self.document
    }

    pub fn is_tombstoned(&self, id: ObjectId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Merge a patch from any source, local or remote.
    pub fn merge(&mut self, patch: &Patch) -> MergeOutcome {
        let id = patch.object_id;
        if self.tombstones.contains(&id) {
            log::debug!("Ignoring patch for deleted object {}", id);
            return MergeOutcome::Unchanged;
        }
        match &patch.op {
            PatchOp::Delete => {
                self.tombstones.insert(id);
                self.entries.remove(&id);
                match self.document.remove(id) {
                    Some(_) => MergeOutcome::Removed(id),
                    None => MergeOutcome::Unchanged,
                }
            }
            PatchOp::Create { object } => self.merge_create(object, patch.stamp),
            PatchOp::Set { attribute } => self.merge_set(id, attribute, patch.stamp),
        }
    }

    fn merge_create(&mut self, object: &SceneObject, stamp: Stamp) -> MergeOutcome {
        let id = object.id();
        let entry = self.entries.entry(id).or_default();
        if entry.base.is_some() {
            return MergeOutcome::Unchanged;
        }
        for attribute in object.attributes() {
            entry.offer(Register { attribute, stamp });
        }
        // Drop buffered writes the kind turned out not to support.
        let kind = object.kind();
        entry.registers.retain(|property, _| kind.supports(*property));
        entry.base = Some((object.clone(), stamp));

        match entry.materialize() {
            Some(materialized) => {
                self.document.insert(materialized.clone());
                MergeOutcome::Created(materialized)
            }
            None => MergeOutcome::Unchanged,
        }
    }

    fn merge_set(&mut self, id: ObjectId, attribute: &Attribute, stamp: Stamp) -> MergeOutcome {
        let entry = self.entries.entry(id).or_default();
        if let Some((base, _)) = &entry.base {
            if !base.kind().supports(attribute.property()) {
                log::warn!(
                    "Ignoring {} patch for {} object {}",
                    attribute.property(),
                    base.kind(),
                    id
                );
                return MergeOutcome::Unchanged;
            }
        }
        let register = Register {
            attribute: attribute.clone(),
            stamp,
        };
        if !entry.offer(register) {
            return MergeOutcome::Unchanged;
        }
        let Some(current) = self.document.get(id) else {
            // Creation record not seen yet; the write waits in the register.
            return MergeOutcome::Unchanged;
        };
        match current.apply_patch(attribute) {
            Ok(updated) => {
                self.document.insert(updated.clone());
                MergeOutcome::Updated(updated)
            }
            Err(e) => {
                log::warn!("Failed to apply patch to {}: {}", id, e);
                MergeOutcome::Unchanged
            }
        }
    }

    /// The patch that currently represents `key`, used to republish state
    /// after a write was dropped. `None` if nothing is known for the key.
    pub fn patch_for_key(&self, key: StoreKey) -> Option<KeyState> {
        let id = key.object_id();
        if self.tombstones.contains(&id) {
            return Some(KeyState::Deleted);
        }
        let entry = self.entries.get(&id)?;
        match key {
            StoreKey::Object(_) => {
                let (object, stamp) = entry.base.as_ref()?;
                Some(KeyState::Live(Patch::create(object.clone(), *stamp)))
            }
            StoreKey::Attribute(_, property) => {
                let register = entry.registers.get(&property)?;
                Some(KeyState::Live(Patch::set(
                    id,
                    register.attribute.clone(),
                    register.stamp,
                )))
            }
        }
    }

    /// Stamp of the creation record of `id`, once it has arrived.
    pub fn creation_stamp(&self, id: ObjectId) -> Option<Stamp> {
        self.entries.get(&id)?.base.as_ref().map(|(_, stamp)| *stamp)
    }

    /// Attribute keys written after `id` was created (or before its creation
    /// record arrived). Values that came with the creation record have no key.
    pub fn attribute_keys(&self, id: ObjectId) -> Vec<StoreKey> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        let created = entry.base.as_ref().map(|(_, stamp)| *stamp);
        entry
            .registers
            .iter()
            .filter(|(_, register)| Some(register.stamp) != created)
            .map(|(property, _)| StoreKey::Attribute(id, *property))
            .collect()
    }
}

/// What the replica holds for one store key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyState {
    Live(Patch),
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, ObjectKind, SerializableColor};
    use crate::sync::ParticipantId;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);

    fn stamp(t: u64, p: ParticipantId) -> Stamp {
        Stamp::new(t, p)
    }

    fn created_rect(replica: &mut SceneReplica) -> ObjectId {
        let rect = SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0));
        let id = rect.id();
        replica.merge(&Patch::create(rect, stamp(0, A)));
        id
    }

    #[test]
    fn test_distinct_attributes_both_survive() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);
        let red = SerializableColor::rgb(255, 0, 0);

        replica.merge(&Patch::set(id, Attribute::Fill(Some(red)), stamp(1, A)));
        replica.merge(&Patch::set(id, Attribute::Width(50.0), stamp(2, B)));

        let object = replica.document().get(id).unwrap();
        assert_eq!(object.style.fill_color, Some(red));
        assert_eq!(object.geometry.width, 50.0);
    }

    #[test]
    fn test_later_timestamp_wins_regardless_of_arrival() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);

        replica.merge(&Patch::set(id, Attribute::Width(10.0), stamp(5, A)));
        let outcome = replica.merge(&Patch::set(id, Attribute::Width(20.0), stamp(3, B)));

        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(replica.document().get(id).unwrap().geometry.width, 10.0);
    }

    #[test]
    fn test_exact_tie_lower_participant_wins() {
        let rect = SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0));
        let id = rect.id();
        let create = Patch::create(rect, stamp(0, A));
        let from_a = Patch::set(id, Attribute::Width(11.0), stamp(4, A));
        let from_b = Patch::set(id, Attribute::Width(22.0), stamp(4, B));

        let mut first = SceneReplica::new();
        for p in [&create, &from_a, &from_b] {
            first.merge(p);
        }
        let mut second = SceneReplica::new();
        for p in [&from_b, &from_a, &create] {
            second.merge(p);
        }

        assert_eq!(first.document().get(id).unwrap().geometry.width, 11.0);
        assert_eq!(first.document(), second.document());
    }

    #[test]
    fn test_delete_beats_concurrent_and_later_writes() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);

        assert_eq!(replica.merge(&Patch::delete(id, stamp(5, A))), MergeOutcome::Removed(id));
        let late = replica.merge(&Patch::set(id, Attribute::Width(99.0), stamp(9, B)));

        assert_eq!(late, MergeOutcome::Unchanged);
        assert!(replica.document().get(id).is_none());
        assert!(replica.is_tombstoned(id));
    }

    #[test]
    fn test_delete_before_create_prevents_resurrection() {
        let rect = SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0));
        let id = rect.id();
        let mut replica = SceneReplica::new();
        replica.merge(&Patch::delete(id, stamp(2, B)));
        assert_eq!(replica.merge(&Patch::create(rect, stamp(1, A))), MergeOutcome::Unchanged);
        assert!(replica.document().is_empty());
    }

    #[test]
    fn test_attribute_before_create_is_buffered() {
        let rect = SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0));
        let id = rect.id();
        let mut replica = SceneReplica::new();

        let early = replica.merge(&Patch::set(id, Attribute::Height(77.0), stamp(5, B)));
        assert_eq!(early, MergeOutcome::Unchanged);

        match replica.merge(&Patch::create(rect, stamp(1, A))) {
            MergeOutcome::Created(object) => assert_eq!(object.geometry.height, 77.0),
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn test_buffered_attribute_older_than_create_loses() {
        let rect = SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0));
        let id = rect.id();
        let mut replica = SceneReplica::new();
        replica.merge(&Patch::set(id, Attribute::Height(77.0), stamp(1, B)));
        replica.merge(&Patch::create(rect, stamp(5, A)));
        assert_eq!(replica.document().get(id).unwrap().geometry.height, 10.0);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);
        let patch = Patch::set(id, Attribute::Rotation(45.0), stamp(3, B));

        assert!(matches!(replica.merge(&patch), MergeOutcome::Updated(_)));
        let snapshot = replica.document().clone();
        assert_eq!(replica.merge(&patch), MergeOutcome::Unchanged);
        assert_eq!(replica.document(), &snapshot);
    }

    #[test]
    fn test_unsupported_remote_attribute_ignored() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);
        let outcome = replica.merge(&Patch::set(id, Attribute::FontSize(12.0), stamp(3, B)));
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert!(replica.patch_for_key(StoreKey::Attribute(id, Property::FontSize)).is_none());
    }

    #[test]
    fn test_patch_for_key() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);
        replica.merge(&Patch::set(id, Attribute::Width(30.0), stamp(3, B)));

        match replica.patch_for_key(StoreKey::Attribute(id, Property::Width)) {
            Some(KeyState::Live(patch)) => {
                assert_eq!(patch.stamp, stamp(3, B));
                assert_eq!(patch.op, PatchOp::Set { attribute: Attribute::Width(30.0) });
            }
            other => panic!("unexpected {:?}", other),
        }

        replica.merge(&Patch::delete(id, stamp(4, A)));
        assert_eq!(replica.patch_for_key(StoreKey::Object(id)), Some(KeyState::Deleted));
    }

    #[test]
    fn test_attribute_keys_skip_creation_values() {
        let mut replica = SceneReplica::new();
        let id = created_rect(&mut replica);
        assert!(replica.attribute_keys(id).is_empty());

        replica.merge(&Patch::set(id, Attribute::Rotation(45.0), stamp(2, B)));
        assert_eq!(
            replica.attribute_keys(id),
            vec![StoreKey::Attribute(id, Property::Rotation)]
        );
    }
}
