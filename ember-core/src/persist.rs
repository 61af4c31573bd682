//! Persistence collaborators and the export/import file format.
//!
//! The store writes its full state through a [`StateStore`] after every
//! mutation and rehydrates from it on startup. The trait models a durable
//! key-value slot; [`JsonFileStore`] backs it with a single JSON file and
//! [`MemoryStateStore`] keeps it in memory for tests and ephemeral use.

use crate::character::Character;
use crate::message::Message;
use crate::store::StoreState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current export format version.
pub const EXPORT_VERSION: &str = "1.0";

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A durable slot holding the persisted store aggregate.
///
/// `save_state` is write-through: it is called synchronously on every store
/// mutation, and its failures surface to the caller rather than being
/// swallowed.
pub trait StateStore {
    fn load_state(&self) -> Result<Option<StoreState>, PersistError>;
    fn save_state(&self, state: &StoreState) -> Result<(), PersistError>;
}

/// File-backed state store: one pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<Option<StoreState>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state: StoreState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    fn save_state(&self, state: &StoreState) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory state store. The slot holds serialized JSON so that a
/// save/load cycle exercises the same path as a durable backend.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slot: RefCell<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw serialized slot, if anything has been saved.
    pub fn snapshot(&self) -> Option<String> {
        self.slot.borrow().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load_state(&self) -> Result<Option<StoreState>, PersistError> {
        match self.slot.borrow().as_deref() {
            Some(content) => Ok(Some(serde_json::from_str(content)?)),
            None => Ok(None),
        }
    }

    fn save_state(&self, state: &StoreState) -> Result<(), PersistError> {
        let content = serde_json::to_string(state)?;
        *self.slot.borrow_mut() = Some(content);
        Ok(())
    }
}

/// The shareable export format.
///
/// Import is forward-compatible: any JSON object carrying a `characters`
/// array is accepted, everything else is rejected without touching state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub characters: Vec<Character>,
    #[serde(default)]
    pub conversations: Vec<Message>,
    pub exported_at: DateTime<Utc>,
    pub version: String,
}

impl ExportData {
    pub fn new(characters: Vec<Character>, conversations: Vec<Message>) -> Self {
        Self {
            characters,
            conversations,
            exported_at: Utc::now(),
            version: EXPORT_VERSION.to_string(),
        }
    }
}
