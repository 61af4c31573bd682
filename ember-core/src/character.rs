//! Character types: identity, personality, and creation input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Minimum backstory length enforced by the creation flow.
pub const MIN_BACKSTORY_LEN: usize = 50;

/// Unique identifier for characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A character's personality, driving reply style and pacing.
///
/// External data (import blobs, creation forms) may carry arbitrary tags;
/// anything unrecognized resolves to [`Personality::Unknown`] at the
/// deserialization boundary and behaves as `Friendly` from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Personality {
    Friendly,
    Sarcastic,
    Wise,
    Mysterious,
    Cheerful,
    Serious,
    Romantic,
    Adventurous,
    Unknown,
}

impl Personality {
    /// Parse an external tag. Never fails: unrecognized tags map to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "friendly" => Personality::Friendly,
            "sarcastic" => Personality::Sarcastic,
            "wise" => Personality::Wise,
            "mysterious" | "dark" => Personality::Mysterious,
            "cheerful" => Personality::Cheerful,
            "serious" => Personality::Serious,
            "romantic" => Personality::Romantic,
            "adventurous" => Personality::Adventurous,
            _ => Personality::Unknown,
        }
    }

    /// The canonical tag for this personality.
    pub fn tag(&self) -> &'static str {
        match self {
            Personality::Friendly => "friendly",
            Personality::Sarcastic => "sarcastic",
            Personality::Wise => "wise",
            Personality::Mysterious => "mysterious",
            Personality::Cheerful => "cheerful",
            Personality::Serious => "serious",
            Personality::Romantic => "romantic",
            Personality::Adventurous => "adventurous",
            Personality::Unknown => "unknown",
        }
    }

    /// Short style guidance for the system prompt.
    pub fn style_hint(&self) -> &'static str {
        match self {
            Personality::Friendly | Personality::Unknown => {
                "Warm and approachable; you make people feel welcome."
            }
            Personality::Sarcastic => "Dry wit and sharp comebacks; you tease, never cruelly.",
            Personality::Wise => "Measured and thoughtful; you speak from long experience.",
            Personality::Mysterious => "Guarded and cryptic; you reveal little, hint at much.",
            Personality::Cheerful => "Bubbly and enthusiastic; everything excites you.",
            Personality::Serious => "Direct and composed; you waste no words.",
            Personality::Romantic => "Tender and poetic; you speak from the heart.",
            Personality::Adventurous => "Bold and restless; you crave the next thrill.",
        }
    }

    pub fn all() -> [Personality; 8] {
        [
            Personality::Friendly,
            Personality::Sarcastic,
            Personality::Wise,
            Personality::Mysterious,
            Personality::Cheerful,
            Personality::Serious,
            Personality::Romantic,
            Personality::Adventurous,
        ]
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl Serialize for Personality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Personality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Personality::from_tag(&tag))
    }
}

/// A user-authored persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub personality: Personality,
    pub backstory: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors from validating character creation input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("character name must not be empty")]
    EmptyName,

    #[error("backstory must be at least {min} characters (got {len})")]
    BackstoryTooShort { min: usize, len: usize },
}

/// Input for creating a character.
#[derive(Debug, Clone)]
pub struct CharacterDraft {
    pub name: String,
    pub personality: Personality,
    pub backstory: String,
}

impl CharacterDraft {
    pub fn new(
        name: impl Into<String>,
        personality: Personality,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            personality,
            backstory: backstory.into(),
        }
    }

    /// Validate the creation-flow constraints: non-empty name, minimum
    /// backstory length. The store itself only re-checks the name.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.name.trim().is_empty() {
            return Err(DraftError::EmptyName);
        }
        let len = self.backstory.chars().count();
        if len < MIN_BACKSTORY_LEN {
            return Err(DraftError::BackstoryTooShort {
                min: MIN_BACKSTORY_LEN,
                len,
            });
        }
        Ok(())
    }
}

/// A partial update applied to an existing character.
#[derive(Debug, Clone, Default)]
pub struct CharacterUpdate {
    pub name: Option<String>,
    pub personality: Option<Personality>,
    pub backstory: Option<String>,
    pub is_favorite: Option<bool>,
}

impl CharacterUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn personality(mut self, personality: Personality) -> Self {
        self.personality = Some(personality);
        self
    }

    pub fn backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    pub fn favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = Some(is_favorite);
        self
    }
}
