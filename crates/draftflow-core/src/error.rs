//! Error types for the sync core.
//!
//! None of these are fatal: every failure leaves the local scene in a
//! consistent state and is either surfaced to the UI or retried.

use thiserror::Error;

use crate::scene::{ObjectId, ObjectKind, Property};
use crate::sync::ParticipantId;

/// Validation failures of the scene model and attribute parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    /// The property does not exist on objects of this kind.
    #[error("Invalid patch: {property} is not a property of {kind}")]
    InvalidPatch { kind: ObjectKind, property: Property },
    /// The raw value could not be turned into a value for the property.
    #[error("Invalid value {value:?} for {property}: {reason}")]
    InvalidAttributeValue {
        property: Property,
        value: String,
        reason: String,
    },
}

/// Errors returned by local edit operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    /// Another participant holds the edit claim for this object.
    #[error("Object {object_id} is being edited by {owner}")]
    ObjectLocked {
        object_id: ObjectId,
        owner: ParticipantId,
    },
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),
}

/// Failures reported by a shared store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network or availability failure; the write may be retried.
    #[error("Transient store failure: {0}")]
    Transient(String),
    /// The store refused the write; retrying will not help.
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Failures encoding or decoding store and presence payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed store key: {0}")]
    Key(String),
}

/// Failures loading a [`SyncConfig`](crate::config::SyncConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

pub type SceneResult<T> = Result<T, SceneError>;
pub type EditResult<T> = Result<T, EditError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type CodecResult<T> = Result<T, CodecError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
