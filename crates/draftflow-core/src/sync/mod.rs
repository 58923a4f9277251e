//! Synchronization with the shared multi-writer store.
//!
//! Every mutation travels as a [`Patch`]: a single attribute write, an
//! object creation record, or a delete, stamped with a [`Stamp`]. Replicas
//! resolve conflicts per attribute with last-writer-wins ([`Stamp::supersedes`])
//! and tombstone deletes so a stale edit can never resurrect an object.
//!
//! # Store layout
//!
//! ```text
//! objects/<id>             creation record (Patch with PatchOp::Create)
//! objects/<id>/<property>  latest write of one attribute (PatchOp::Set)
//! ```
//!
//! Values are JSON-encoded patches. Deleting `objects/<id>` is the tombstone.

mod gateway;
mod outbox;
mod presence;
mod replica;
mod store;

pub use gateway::{SyncGateway, SyncStatus};
pub use presence::{MemoryPresence, MemoryPresenceHub, PeerInfo, PresenceChannel, PresenceMessage, Roster};
pub use replica::{KeyState, MergeOutcome, SceneReplica};
pub use store::{MemoryHub, MemorySceneStore, SharedSceneStore, StoreEvent};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::scene::{Attribute, ObjectId, Property, SceneObject};

/// Prefix of every key this core writes.
pub const OBJECTS_PREFIX: &str = "objects";

/// Identifier of one participant (one editing client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// A random participant id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u128() as u64)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// When and by whom a patch was written.
///
/// Ordered by precedence: a later timestamp is greater, and on an exact tie
/// the *lower* participant id is greater. Two stamps compare equal only when
/// both fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Milliseconds since the Unix epoch (hybrid, see [`HybridClock`]).
    pub timestamp: u64,
    pub participant: ParticipantId,
}

impl Stamp {
    pub fn new(timestamp: u64, participant: ParticipantId) -> Self {
        Self {
            timestamp,
            participant,
        }
    }

    /// Whether a write stamped `self` replaces one stamped `other`.
    pub fn supersedes(&self, other: &Stamp) -> bool {
        self > other
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| other.participant.cmp(&self.participant))
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Issues stamps that never go backwards.
///
/// The timestamp is `max(wall clock, last issued or observed + 1)`, so a
/// participant's own writes are strictly increasing and a write made after
/// seeing a remote value always supersedes it, even under clock skew.
#[derive(Debug, Clone)]
pub struct HybridClock {
    participant: ParticipantId,
    last: u64,
}

impl HybridClock {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            last: 0,
        }
    }

    pub fn next_stamp(&mut self, wall_millis: u64) -> Stamp {
        let timestamp = wall_millis.max(self.last.saturating_add(1));
        self.last = timestamp;
        Stamp::new(timestamp, self.participant)
    }

    /// Account for a stamp seen on a remote patch.
    pub fn observe(&mut self, stamp: &Stamp) {
        self.last = self.last.max(stamp.timestamp);
    }
}

/// What a patch does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Optimistic creation; carries the full initial object.
    Create { object: SceneObject },
    /// Write of a single attribute.
    Set { attribute: Attribute },
    Delete,
}

/// A timestamped mutation of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub object_id: ObjectId,
    pub op: PatchOp,
    pub stamp: Stamp,
}

impl Patch {
    pub fn create(object: SceneObject, stamp: Stamp) -> Self {
        Self {
            object_id: object.id(),
            op: PatchOp::Create { object },
            stamp,
        }
    }

    pub fn set(object_id: ObjectId, attribute: Attribute, stamp: Stamp) -> Self {
        Self {
            object_id,
            op: PatchOp::Set { attribute },
            stamp,
        }
    }

    pub fn delete(object_id: ObjectId, stamp: Stamp) -> Self {
        Self {
            object_id,
            op: PatchOp::Delete,
            stamp,
        }
    }

    /// The property written, for attribute patches.
    pub fn property(&self) -> Option<Property> {
        match &self.op {
            PatchOp::Set { attribute } => Some(attribute.property()),
            _ => None,
        }
    }

    /// The store key this patch is written under.
    pub fn store_key(&self) -> StoreKey {
        match self.property() {
            Some(property) => StoreKey::Attribute(self.object_id, property),
            None => StoreKey::Object(self.object_id),
        }
    }

    pub fn encode(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(value: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

/// A key in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    Object(ObjectId),
    Attribute(ObjectId, Property),
}

impl StoreKey {
    pub fn object_id(&self) -> ObjectId {
        match self {
            StoreKey::Object(id) | StoreKey::Attribute(id, _) => *id,
        }
    }

    pub fn parse(key: &str) -> CodecResult<Self> {
        let malformed = || CodecError::Key(key.to_string());
        let mut parts = key.split('/');
        if parts.next() != Some(OBJECTS_PREFIX) {
            return Err(malformed());
        }
        let id = parts
            .next()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(malformed)?;
        let parsed = match parts.next() {
            None => StoreKey::Object(id),
            Some(name) => StoreKey::Attribute(id, Property::from_name(name).ok_or_else(malformed)?),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(parsed)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Object(id) => write!(f, "{OBJECTS_PREFIX}/{id}"),
            StoreKey::Attribute(id, property) => write!(f, "{OBJECTS_PREFIX}/{id}/{property}"),
        }
    }
}

/// A visible change to the scene, as reported to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneChange {
    Created(SceneObject),
    Updated(SceneObject),
    Removed(ObjectId),
}

impl SceneChange {
    pub fn object_id(&self) -> ObjectId {
        match self {
            SceneChange::Created(o) | SceneChange::Updated(o) => o.id(),
            SceneChange::Removed(id) => *id,
        }
    }
}
