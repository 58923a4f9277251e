//! DraftFlow Core Library
//!
//! Shape synchronization and conflict resolution for a collaborative canvas:
//! the scene model, attribute editing, advisory edit claims, the selection
//! state machine and the gateway to a shared multi-writer store.

pub mod claims;
pub mod clock;
pub mod collaboration;
pub mod config;
pub mod document;
pub mod editor;
pub mod error;
pub mod scene;
pub mod selection;
pub mod sync;
pub mod tools;

pub use claims::{ClaimAction, ClaimEvent, ClaimState, ClaimTransition, EditSessionTracker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaboration::{CollaborationSession, SceneObserver};
pub use config::SyncConfig;
pub use document::SceneDocument;
pub use editor::{AttributeEditor, ElementAttributes};
pub use error::{CodecError, ConfigError, EditError, SceneError, StoreError};
pub use scene::{
    Attribute, FontFamily, FontWeight, Geometry, ObjectId, ObjectKind, Property, SceneObject,
    SerializableColor,
};
pub use selection::{SelectionChange, SelectionMachine, SelectionState};
pub use sync::{
    MemoryHub, MemoryPresenceHub, ParticipantId, Patch, SceneChange, SceneReplica, Stamp,
    SyncGateway, SyncStatus,
};
pub use tools::{Palette, ToolKind};
