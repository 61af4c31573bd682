//! The entity store: single source of truth for characters and messages.
//!
//! All reads are derived, all writes go through named operations, and every
//! mutation writes the full aggregate through the persistence collaborator
//! before returning. Message timestamps are issued by a monotonic clock so
//! insertion order and timestamp order always agree.

use crate::character::{Character, CharacterDraft, CharacterId, CharacterUpdate, Personality};
use crate::message::{Message, MessageId};
use crate::persist::{ExportData, MemoryStateStore, PersistError, StateStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no character with id {0}")]
    CharacterNotFound(CharacterId),

    #[error("no message with id {0}")]
    MessageNotFound(MessageId),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("import rejected: {0}")]
    ImportFormat(String),
}

/// The persisted aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub conversations: Vec<Message>,
    #[serde(default)]
    pub active_character_id: Option<CharacterId>,
}

/// Sort orders for the character list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharacterSort {
    #[default]
    Newest,
    Oldest,
    Name,
    MostChats,
    FavoritesFirst,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_characters: usize,
    pub total_messages: usize,
    pub personality_counts: HashMap<Personality, usize>,
    pub most_active: Option<MostActive>,
}

/// The character with the most associated messages.
///
/// Ties break by lexicographic character id, so the statistic is
/// deterministic regardless of iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MostActive {
    pub character_id: CharacterId,
    pub name: String,
    pub message_count: usize,
}

/// The character/conversation state container.
///
/// Constructed once and passed by handle to whichever component needs it;
/// there is no ambient global instance.
pub struct EntityStore {
    state: StoreState,
    persistence: Box<dyn StateStore>,
    last_timestamp: Option<DateTime<Utc>>,

    // Ephemeral view preferences, never persisted.
    search_query: String,
    personality_filter: Option<Personality>,
    sort_order: CharacterSort,
}

impl EntityStore {
    /// Open a store, rehydrating from the persistence collaborator.
    pub fn open(persistence: Box<dyn StateStore>) -> Result<Self, StoreError> {
        let state = persistence.load_state()?.unwrap_or_default();
        let last_timestamp = state.conversations.iter().map(|m| m.timestamp).max();

        tracing::debug!(
            characters = state.characters.len(),
            messages = state.conversations.len(),
            "store rehydrated"
        );

        Ok(Self {
            state,
            persistence,
            last_timestamp,
            search_query: String::new(),
            personality_filter: None,
            sort_order: CharacterSort::default(),
        })
    }

    /// An empty store backed by an in-memory slot.
    pub fn in_memory() -> Self {
        Self {
            state: StoreState::default(),
            persistence: Box::new(MemoryStateStore::new()),
            last_timestamp: None,
            search_query: String::new(),
            personality_filter: None,
            sort_order: CharacterSort::default(),
        }
    }

    // ========================================================================
    // Character lifecycle
    // ========================================================================

    /// Create a character from a draft and return its fresh id.
    ///
    /// Full draft validation belongs to the creation flow; the store only
    /// re-checks that the name is non-empty.
    pub fn create_character(&mut self, draft: CharacterDraft) -> Result<CharacterId, StoreError> {
        if draft.name.trim().is_empty() {
            return Err(StoreError::Validation(
                "character name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let character = Character {
            id: CharacterId::new(),
            name: draft.name,
            personality: draft.personality,
            backstory: draft.backstory,
            is_favorite: false,
            created_at: now,
            updated_at: now,
        };
        let id = character.id;

        self.state.characters.push(character);
        self.persist()?;
        Ok(id)
    }

    /// Merge a partial update into an existing character.
    pub fn update_character(
        &mut self,
        id: CharacterId,
        update: CharacterUpdate,
    ) -> Result<(), StoreError> {
        if let Some(ref name) = update.name {
            if name.trim().is_empty() {
                return Err(StoreError::Validation(
                    "character name must not be empty".to_string(),
                ));
            }
        }

        let character = self
            .state
            .characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::CharacterNotFound(id))?;

        if let Some(name) = update.name {
            character.name = name;
        }
        if let Some(personality) = update.personality {
            character.personality = personality;
        }
        if let Some(backstory) = update.backstory {
            character.backstory = backstory;
        }
        if let Some(is_favorite) = update.is_favorite {
            character.is_favorite = is_favorite;
        }
        character.updated_at = Utc::now();

        self.persist()?;
        Ok(())
    }

    /// Flip the favorite flag; two toggles restore the original state.
    pub fn toggle_favorite(&mut self, id: CharacterId) -> Result<bool, StoreError> {
        let character = self
            .state
            .characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::CharacterNotFound(id))?;

        character.is_favorite = !character.is_favorite;
        character.updated_at = Utc::now();
        let is_favorite = character.is_favorite;

        self.persist()?;
        Ok(is_favorite)
    }

    /// Delete a character and, atomically from the caller's view, every
    /// message that references it. Clears the active id if it pointed here.
    pub fn delete_character(&mut self, id: CharacterId) -> Result<(), StoreError> {
        let before = self.state.characters.len();
        self.state.characters.retain(|c| c.id != id);
        if self.state.characters.len() == before {
            return Err(StoreError::CharacterNotFound(id));
        }

        self.state.conversations.retain(|m| m.character_id != id);
        if self.state.active_character_id == Some(id) {
            self.state.active_character_id = None;
        }

        self.persist()?;
        Ok(())
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Append a message for a character and return it.
    ///
    /// Timestamps are strictly increasing across all appends, so two calls
    /// within the same clock tick still order correctly.
    pub fn add_message(
        &mut self,
        character_id: CharacterId,
        text: &str,
        is_user: bool,
    ) -> Result<Message, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::Validation(
                "message text must not be empty".to_string(),
            ));
        }
        if !self.state.characters.iter().any(|c| c.id == character_id) {
            return Err(StoreError::CharacterNotFound(character_id));
        }

        let message = Message {
            id: MessageId::new(),
            character_id,
            text: text.to_string(),
            is_user,
            timestamp: self.next_timestamp(),
            edited: false,
            edited_at: None,
        };

        self.state.conversations.push(message.clone());
        self.persist()?;
        Ok(message)
    }

    /// Delete a single message.
    pub fn delete_message(&mut self, id: MessageId) -> Result<(), StoreError> {
        let before = self.state.conversations.len();
        self.state.conversations.retain(|m| m.id != id);
        if self.state.conversations.len() == before {
            return Err(StoreError::MessageNotFound(id));
        }
        self.persist()?;
        Ok(())
    }

    /// Replace a message's text, marking it edited.
    pub fn edit_message(&mut self, id: MessageId, new_text: &str) -> Result<(), StoreError> {
        if new_text.trim().is_empty() {
            return Err(StoreError::Validation(
                "message text must not be empty".to_string(),
            ));
        }

        let message = self
            .state
            .conversations
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::MessageNotFound(id))?;

        message.text = new_text.to_string();
        message.edited = true;
        message.edited_at = Some(Utc::now());

        self.persist()?;
        Ok(())
    }

    /// All messages for a character, in insertion order.
    pub fn get_messages(&self, character_id: CharacterId) -> Vec<Message> {
        self.state
            .conversations
            .iter()
            .filter(|m| m.character_id == character_id)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring filter over a character's messages.
    /// An empty query is a pass-through, not an exclude-all filter.
    pub fn search_messages(&self, character_id: CharacterId, query: &str) -> Vec<Message> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.get_messages(character_id);
        }

        self.state
            .conversations
            .iter()
            .filter(|m| m.character_id == character_id && m.text.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    /// Delete every message for a character, keeping the character.
    pub fn clear_conversation(&mut self, character_id: CharacterId) -> Result<(), StoreError> {
        if !self.state.characters.iter().any(|c| c.id == character_id) {
            return Err(StoreError::CharacterNotFound(character_id));
        }
        self.state
            .conversations
            .retain(|m| m.character_id != character_id);
        self.persist()?;
        Ok(())
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Set the substring search applied by [`Self::get_filtered_characters`].
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    /// Set the exact personality filter.
    pub fn set_personality_filter(&mut self, filter: Option<Personality>) {
        self.personality_filter = filter;
    }

    /// Set the sort order.
    pub fn set_sort_order(&mut self, order: CharacterSort) {
        self.sort_order = order;
    }

    /// The character list with search, personality filter, and sort applied,
    /// in that order.
    pub fn get_filtered_characters(&self) -> Vec<Character> {
        let query = self.search_query.trim().to_lowercase();
        let message_counts = self.message_counts();

        let mut characters: Vec<Character> = self
            .state
            .characters
            .iter()
            .filter(|c| {
                if query.is_empty() {
                    return true;
                }
                c.name.to_lowercase().contains(&query)
                    || c.personality.tag().contains(&query)
                    || c.backstory.to_lowercase().contains(&query)
            })
            .filter(|c| match self.personality_filter {
                Some(filter) => c.personality == filter,
                None => true,
            })
            .cloned()
            .collect();

        match self.sort_order {
            CharacterSort::Newest => {
                characters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }
            CharacterSort::Oldest => {
                characters.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            }
            CharacterSort::Name => {
                characters.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            }
            CharacterSort::MostChats => {
                characters.sort_by(|a, b| {
                    let count_a = message_counts.get(&a.id).copied().unwrap_or(0);
                    let count_b = message_counts.get(&b.id).copied().unwrap_or(0);
                    count_b
                        .cmp(&count_a)
                        .then_with(|| b.created_at.cmp(&a.created_at))
                });
            }
            CharacterSort::FavoritesFirst => {
                characters.sort_by(|a, b| {
                    b.is_favorite
                        .cmp(&a.is_favorite)
                        .then_with(|| b.created_at.cmp(&a.created_at))
                });
            }
        }

        characters
    }

    /// Aggregate statistics over the whole store.
    pub fn get_stats(&self) -> StoreStats {
        let message_counts = self.message_counts();

        let mut personality_counts: HashMap<Personality, usize> = HashMap::new();
        for character in &self.state.characters {
            *personality_counts.entry(character.personality).or_default() += 1;
        }

        let mut most_active: Option<MostActive> = None;
        for character in &self.state.characters {
            let count = message_counts.get(&character.id).copied().unwrap_or(0);
            let better = match &most_active {
                None => true,
                Some(best) => {
                    count > best.message_count
                        || (count == best.message_count && character.id < best.character_id)
                }
            };
            if better {
                most_active = Some(MostActive {
                    character_id: character.id,
                    name: character.name.clone(),
                    message_count: count,
                });
            }
        }

        StoreStats {
            total_characters: self.state.characters.len(),
            total_messages: self.state.conversations.len(),
            personality_counts,
            most_active,
        }
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Serialize the full character/conversation set for sharing.
    pub fn export_data(&self) -> ExportData {
        ExportData::new(
            self.state.characters.clone(),
            self.state.conversations.clone(),
        )
    }

    /// Replace `characters` and `conversations` wholesale from an import
    /// blob. Any JSON object with a `characters` array is accepted; anything
    /// else is rejected without mutating state.
    pub fn import_data(&mut self, blob: serde_json::Value) -> Result<(), StoreError> {
        let object = blob
            .as_object()
            .ok_or_else(|| StoreError::ImportFormat("payload is not an object".to_string()))?;

        let characters_value = object
            .get("characters")
            .ok_or_else(|| StoreError::ImportFormat("missing `characters` key".to_string()))?;
        if !characters_value.is_array() {
            return Err(StoreError::ImportFormat(
                "`characters` is not an array".to_string(),
            ));
        }

        let characters: Vec<Character> = serde_json::from_value(characters_value.clone())
            .map_err(|e| StoreError::ImportFormat(format!("malformed character: {e}")))?;

        let conversations: Vec<Message> = match object.get("conversations") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| StoreError::ImportFormat(format!("malformed message: {e}")))?,
            None => Vec::new(),
        };

        // Everything parsed; safe to mutate now.
        self.state.characters = characters;
        self.state.conversations = conversations;
        if let Some(active) = self.state.active_character_id {
            if !self.state.characters.iter().any(|c| c.id == active) {
                self.state.active_character_id = None;
            }
        }
        self.last_timestamp = self.state.conversations.iter().map(|m| m.timestamp).max();

        self.persist()?;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// All characters in creation order.
    pub fn characters(&self) -> &[Character] {
        &self.state.characters
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.state.characters.iter().find(|c| c.id == id)
    }

    /// Point the weak active reference at a character (or nothing).
    /// The reference may dangle; readers resolve it through
    /// [`Self::active_character`].
    pub fn set_active_character(&mut self, id: Option<CharacterId>) -> Result<(), StoreError> {
        self.state.active_character_id = id;
        self.persist()?;
        Ok(())
    }

    pub fn active_character(&self) -> Option<&Character> {
        self.state
            .active_character_id
            .and_then(|id| self.character(id))
    }

    fn message_counts(&self) -> HashMap<CharacterId, usize> {
        let mut counts: HashMap<CharacterId, usize> = HashMap::new();
        for message in &self.state.conversations {
            *counts.entry(message.character_id).or_default() += 1;
        }
        counts
    }

    /// Issue the next message timestamp, strictly later than every timestamp
    /// issued before it.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::milliseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn persist(&self) -> Result<(), PersistError> {
        self.persistence.save_state(&self.state)
    }
}
