//! Bridge between the local replica and the shared store.

use super::outbox::{OutboundOp, Outbox};
use super::replica::{KeyState, SceneReplica};
use super::store::SharedSceneStore;
use super::{HybridClock, ParticipantId, Patch, PatchOp, SceneChange, Stamp, StoreKey};
use crate::config::SyncConfig;
use crate::document::SceneDocument;
use crate::error::{CodecResult, StoreResult};

/// Whether every local write has reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    InSync,
    /// At least one write was abandoned and has not been republished yet.
    OutOfSync,
}

type ChangeListener = Box<dyn FnMut(&SceneChange)>;

/// Applies local patches optimistically, publishes them and merges what
/// other participants wrote.
///
/// Publishing never blocks: writes are queued and drained by [`flush`],
/// remote changes are pulled by [`poll_remote`].
///
/// [`flush`]: SyncGateway::flush
/// [`poll_remote`]: SyncGateway::poll_remote
pub struct SyncGateway {
    participant: ParticipantId,
    replica: SceneReplica,
    store: Box<dyn SharedSceneStore>,
    outbox: Outbox,
    config: SyncConfig,
    clock: HybridClock,
    listeners: Vec<ChangeListener>,
    status: SyncStatus,
}

impl SyncGateway {
    pub fn new(
        participant: ParticipantId,
        store: Box<dyn SharedSceneStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            participant,
            replica: SceneReplica::new(),
            store,
            outbox: Outbox::new(),
            config,
            clock: HybridClock::new(participant),
            listeners: Vec::new(),
            status: SyncStatus::InSync,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn document(&self) -> &SceneDocument {
        self.replica.document()
    }

    pub fn replica(&self) -> &SceneReplica {
        &self.replica
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.status == SyncStatus::OutOfSync
    }

    /// Writes not yet accepted by the store.
    pub fn pending_writes(&self) -> usize {
        self.outbox.pending()
    }

    pub fn next_stamp(&mut self, wall_millis: u64) -> Stamp {
        self.clock.next_stamp(wall_millis)
    }

    /// Apply a local patch and queue it for publishing.
    pub fn commit(&mut self, patch: Patch, now: u64) -> CodecResult<Option<SceneChange>> {
        // Publish first: a delete needs the attribute keys the merge discards.
        self.publish(&patch, now)?;
        Ok(self.replica.merge(&patch).into_change())
    }

    /// Queue `patch` for the store. Fire and forget: failures are retried by
    /// [`flush`](SyncGateway::flush).
    pub fn publish(&mut self, patch: &Patch, now: u64) -> CodecResult<()> {
        let key = patch.store_key();
        match &patch.op {
            PatchOp::Delete => {
                for attribute_key in self.replica.attribute_keys(patch.object_id) {
                    self.outbox
                        .enqueue(attribute_key.to_string(), OutboundOp::Delete, now);
                }
                self.outbox.enqueue(key.to_string(), OutboundOp::Delete, now);
            }
            PatchOp::Create { .. } | PatchOp::Set { .. } => {
                self.outbox
                    .enqueue(key.to_string(), OutboundOp::Set(patch.encode()?), now);
            }
        }
        Ok(())
    }

    /// Register a handler run for every visible change merged from the store.
    pub fn on_remote_change(&mut self, listener: impl FnMut(&SceneChange) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Send due writes. Returns the new status if it changed.
    pub fn flush(&mut self, now: u64) -> Option<SyncStatus> {
        let report = self.outbox.flush(self.store.as_mut(), now, &self.config);

        if report.sent > 0 && self.outbox.has_stale() {
            self.republish_stale(now);
        }

        let status = if self.outbox.has_stale()
            || (self.status == SyncStatus::OutOfSync && !self.outbox.is_empty())
        {
            SyncStatus::OutOfSync
        } else {
            SyncStatus::InSync
        };
        if status == self.status {
            return None;
        }
        match status {
            SyncStatus::OutOfSync => log::warn!("Scene is out of sync with the store"),
            SyncStatus::InSync => log::info!("Scene back in sync with the store"),
        }
        self.status = status;
        Some(status)
    }

    /// Requeue abandoned keys from the replica's current state.
    fn republish_stale(&mut self, now: u64) {
        let keys = self.outbox.take_stale();
        log::info!("Republishing {} dropped writes", keys.len());
        for raw in keys {
            let op = match StoreKey::parse(&raw).map(|key| self.replica.patch_for_key(key)) {
                Ok(Some(KeyState::Live(patch))) => match patch.encode() {
                    Ok(value) => OutboundOp::Set(value),
                    Err(e) => {
                        log::warn!("Cannot republish {}: {}", raw, e);
                        continue;
                    }
                },
                Ok(Some(KeyState::Deleted)) => OutboundOp::Delete,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Cannot republish {}: {}", raw, e);
                    continue;
                }
            };
            self.outbox.enqueue(raw, op, now);
        }
    }

    /// Merge every change the store reported since the last poll.
    pub fn poll_remote(&mut self) -> Vec<SceneChange> {
        let events = self.store.poll_events();
        let mut changes = Vec::new();
        for event in events {
            if let Some(change) = self.ingest(&event.key, event.value.as_deref()) {
                changes.push(change);
            }
        }
        self.notify(&changes);
        changes
    }

    /// Load the store's current contents. Call once before live polling.
    pub fn bootstrap(&mut self) -> StoreResult<Vec<SceneChange>> {
        let entries = self.store.entries()?;
        log::info!("Bootstrapping from {} store entries", entries.len());
        let mut changes = Vec::new();
        for (key, value) in entries {
            if let Some(change) = self.ingest(&key, Some(&value)) {
                changes.push(change);
            }
        }
        self.notify(&changes);
        Ok(changes)
    }

    fn notify(&mut self, changes: &[SceneChange]) {
        for change in changes {
            for listener in &mut self.listeners {
                listener(change);
            }
        }
    }

    /// Decode and merge one store entry. `None` value is a tombstone.
    fn ingest(&mut self, raw_key: &str, value: Option<&str>) -> Option<SceneChange> {
        let key = match StoreKey::parse(raw_key) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Ignoring store entry: {}", e);
                return None;
            }
        };

        let patch = match (key, value) {
            (StoreKey::Object(id), None) => Patch::delete(id, Stamp::new(0, ParticipantId(0))),
            // Attribute keys are only removed as cleanup after a delete.
            (StoreKey::Attribute(..), None) => return None,
            (_, Some(value)) => match Patch::decode(value) {
                Ok(patch) if patch.store_key() == key => patch,
                Ok(_) => {
                    log::warn!("Patch stored under mismatched key {}", raw_key);
                    return None;
                }
                Err(e) => {
                    log::warn!("Undecodable value for {}: {}", raw_key, e);
                    return None;
                }
            },
        };

        if matches!(patch.op, PatchOp::Delete) && value.is_some() {
            log::warn!("Delete patch stored as a value under {}", raw_key);
            return None;
        }

        self.clock.observe(&patch.stamp);
        let change = self.replica.merge(&patch).into_change();
        if let StoreKey::Attribute(..) = key {
            self.repair_attribute_key(raw_key, key, &patch);
        }
        change
    }

    /// The store keeps whatever write reached it last. When that write lost
    /// the merge, put the winner back so later joiners bootstrap it.
    fn repair_attribute_key(&mut self, raw_key: &str, key: StoreKey, written: &Patch) {
        let op = match self.replica.patch_for_key(key) {
            Some(KeyState::Deleted) => {
                log::debug!("Removing {} written after its object was deleted", raw_key);
                OutboundOp::Delete
            }
            Some(KeyState::Live(winner)) if winner.stamp == written.stamp => return,
            // The creation record already carries the winning value.
            Some(KeyState::Live(winner))
                if self.replica.creation_stamp(key.object_id()) == Some(winner.stamp) =>
            {
                OutboundOp::Delete
            }
            Some(KeyState::Live(winner)) => match winner.encode() {
                Ok(value) => OutboundOp::Set(value),
                Err(e) => {
                    log::warn!("Cannot restore {}: {}", raw_key, e);
                    return;
                }
            },
            None => return,
        };
        log::debug!("Store holds a superseded write for {}, restoring", raw_key);
        // Due at the next flush.
        self.outbox.enqueue(raw_key.to_string(), op, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::scene::{Attribute, Geometry, ObjectId, ObjectKind, Property, SceneObject};
    use crate::sync::store::{MemoryHub, MemorySceneStore};
    use std::cell::RefCell;
    use std::rc::Rc;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);

    fn gateway(hub: &MemoryHub, participant: ParticipantId) -> SyncGateway {
        SyncGateway::new(participant, Box::new(hub.connect()), SyncConfig::default())
    }

    fn rect() -> SceneObject {
        SceneObject::create(ObjectKind::Rectangle, Geometry::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn test_commit_is_applied_before_flush() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let object = rect();
        let id = object.id();

        let stamp = a.next_stamp(10);
        let change = a.commit(Patch::create(object, stamp), 10).unwrap();
        assert!(matches!(change, Some(SceneChange::Created(_))));
        assert!(a.document().contains(id));
        assert!(hub.is_empty());

        a.flush(10);
        assert!(hub.get(&StoreKey::Object(id).to_string()).is_some());
    }

    #[test]
    fn test_remote_changes_reach_listeners() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let mut b = gateway(&hub, B);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        b.on_remote_change(move |change| sink.borrow_mut().push(change.object_id()));

        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(10);
        a.commit(Patch::create(object, stamp), 10).unwrap();
        let stamp = a.next_stamp(11);
        a.commit(Patch::set(id, Attribute::Width(42.0), stamp), 11)
            .unwrap();
        a.flush(11);

        let changes = b.poll_remote();
        assert_eq!(changes.len(), 2);
        assert_eq!(*seen.borrow(), vec![id, id]);
        assert_eq!(b.document().get(id).unwrap().geometry.width, 42.0);
    }

    #[test]
    fn test_self_echo_is_silent() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let stamp = a.next_stamp(10);
        a.commit(Patch::create(rect(), stamp), 10).unwrap();
        a.flush(10);
        assert!(a.poll_remote().is_empty());
    }

    #[test]
    fn test_delete_removes_attribute_keys() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(1);
        a.commit(Patch::create(object, stamp), 1).unwrap();
        let stamp = a.next_stamp(2);
        a.commit(Patch::set(id, Attribute::X(5.0), stamp), 2).unwrap();
        a.flush(2);
        assert!(!hub.is_empty());

        let stamp = a.next_stamp(3);
        a.commit(Patch::delete(id, stamp), 3).unwrap();
        a.flush(3);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_observed_stamp_advances_clock() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let mut b = gateway(&hub, B);
        let stamp = a.next_stamp(1_000_000);
        a.commit(Patch::create(rect(), stamp), 0).unwrap();
        a.flush(0);
        b.poll_remote();
        assert!(b.next_stamp(5).supersedes(&stamp));
    }

    #[test]
    fn test_undecodable_entries_are_skipped() {
        let hub = MemoryHub::new();
        let mut raw = hub.connect();
        let id = uuid::Uuid::new_v4();
        raw.set(&format!("objects/{id}"), "{garbage").unwrap();
        raw.set("cursors/elsewhere", "1").unwrap();

        let mut a = SyncGateway::new(A, Box::new(hub.connect()), SyncConfig::default());
        assert!(a.bootstrap().unwrap().is_empty());
        assert!(a.document().is_empty());
    }

    #[test]
    fn test_bootstrap_loads_existing_scene() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(1);
        a.commit(Patch::create(object, stamp), 1).unwrap();
        let stamp = a.next_stamp(2);
        a.commit(Patch::set(id, Attribute::Height(7.0), stamp), 2)
            .unwrap();
        a.flush(2);

        let mut late = gateway(&hub, B);
        let changes = late.bootstrap().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(late.document().get(id).unwrap().geometry.height, 7.0);
    }

    fn width_in_store(hub: &MemoryHub, id: ObjectId) -> Option<f64> {
        let raw = hub.get(&StoreKey::Attribute(id, Property::Width).to_string())?;
        match Patch::decode(&raw).ok()?.op {
            PatchOp::Set {
                attribute: Attribute::Width(w),
            } => Some(w),
            _ => None,
        }
    }

    #[test]
    fn test_store_is_restored_when_older_write_lands_last() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let mut b = gateway(&hub, B);
        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(1);
        a.commit(Patch::create(object, stamp), 1).unwrap();
        a.flush(1);
        b.poll_remote();

        a.commit(Patch::set(id, Attribute::Width(10.0), Stamp::new(5, A)), 5)
            .unwrap();
        b.commit(Patch::set(id, Attribute::Width(20.0), Stamp::new(3, B)), 5)
            .unwrap();
        a.flush(5);
        b.flush(5);
        assert_eq!(width_in_store(&hub, id), Some(20.0));

        a.poll_remote();
        b.poll_remote();
        a.flush(6);
        b.flush(6);
        a.poll_remote();
        b.poll_remote();
        assert_eq!(width_in_store(&hub, id), Some(10.0));

        let mut late = gateway(&hub, ParticipantId(3));
        late.bootstrap().unwrap();
        assert_eq!(late.document().get(id).unwrap().geometry.width, 10.0);
        assert_eq!(late.document(), a.document());
        assert_eq!(a.document(), b.document());
    }

    #[test]
    fn test_write_for_deleted_object_is_removed_from_store() {
        let hub = MemoryHub::new();
        let mut a = gateway(&hub, A);
        let mut b = gateway(&hub, B);
        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(1);
        a.commit(Patch::create(object, stamp), 1).unwrap();
        a.flush(1);
        b.poll_remote();

        let stamp = a.next_stamp(2);
        a.commit(Patch::delete(id, stamp), 2).unwrap();
        let stamp = b.next_stamp(2);
        b.commit(Patch::set(id, Attribute::Width(30.0), stamp), 2)
            .unwrap();
        a.flush(2);
        b.flush(2);
        assert!(!hub.is_empty());

        a.poll_remote();
        b.poll_remote();
        a.flush(3);
        b.flush(3);
        assert!(hub.is_empty());

        let mut late = gateway(&hub, ParticipantId(3));
        assert!(late.bootstrap().unwrap().is_empty());
        assert!(late.replica().attribute_keys(id).is_empty());
    }

    #[test]
    fn test_dropped_write_is_republished() {
        let hub = MemoryHub::new();
        let mut store: MemorySceneStore = hub.connect();
        store.fail_next(StoreError::Rejected("quota".to_string()));
        let mut a = SyncGateway::new(A, Box::new(store), SyncConfig::default());

        let object = rect();
        let id = object.id();
        let stamp = a.next_stamp(1);
        a.commit(Patch::create(object, stamp), 1).unwrap();
        assert_eq!(a.flush(1), Some(SyncStatus::OutOfSync));
        assert!(a.is_out_of_sync());
        assert!(hub.is_empty());

        // The next successful write triggers the republish.
        let stamp = a.next_stamp(2);
        a.commit(Patch::set(id, Attribute::X(3.0), stamp), 2).unwrap();
        assert_eq!(a.flush(2), None);
        assert_eq!(a.flush(3), Some(SyncStatus::InSync));
        assert!(hub.get(&StoreKey::Object(id).to_string()).is_some());
    }
}
