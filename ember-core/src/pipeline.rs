//! The conversation pipeline: one round of "human sends, character replies".
//!
//! Each send moves through explicit stages: the user message commits to the
//! store first, then a reply source is chosen (the live completion provider
//! when a credential resolves, the local fallback generator otherwise), and
//! the reply commits as a second, strictly-later message. Provider failures
//! classified as quota/rate-limit silently downgrade to fallback; any other
//! failure (timeout included) becomes a single apologetic in-conversation
//! reply, so the thread itself is the error-reporting channel.
//!
//! At most one send per character is in flight. A send future dropped
//! mid-flight appends nothing further and releases its slot, so an abandoned
//! conversation is immediately sendable again (discard semantics).

use crate::character::{CharacterId, Personality};
use crate::credentials::CredentialStore;
use crate::fallback;
use crate::message::Message;
use crate::store::{EntityStore, StoreError};
use completion::{CompletionOptions, CompletionProvider};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

/// Reply text used when the provider returns empty content.
const EMPTY_REPLY_PLACEHOLDER: &str =
    "...I seem to have lost my train of thought. Say that again?";

/// The single apologetic reply produced for non-quota provider failures.
const ERROR_REPLY: &str =
    "I'm sorry, my thoughts are all tangled up right now. Give me a moment and try again?";

/// Pause before the apologetic reply appears.
const ERROR_REPLY_DELAY: Duration = Duration::from_millis(600);

/// Errors from sending a message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyMessage,

    #[error("a reply for character {0} is already in flight")]
    Busy(CharacterId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a committed reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    /// Live completion provider.
    Provider,
    /// Deterministic local generator (no credential, or provider quota
    /// exhausted).
    Fallback,
    /// Apologetic placeholder after a non-quota provider failure.
    ErrorNotice,
}

/// The result of one completed send: both committed messages and the reply's
/// provenance.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub user_message: Message,
    pub reply: Message,
    pub source: ReplySource,
}

/// Configuration for the conversation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Build-time configured provider key. Checked before the per-user
    /// stored key.
    pub api_key: Option<String>,

    /// User whose stored key is consulted when no build-time key exists.
    pub user_id: Option<String>,

    /// Model override passed to the provider.
    pub model: Option<String>,

    /// Maximum tokens for replies.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// Explicit provider timeout; expiry behaves like a non-quota provider
    /// failure.
    pub request_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            user_id: None,
            model: None,
            max_tokens: 512,
            temperature: Some(0.9),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the build-time provider key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the user consulted for a stored key.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens for replies.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the generation temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the provider timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Orchestrates message dispatch against a shared store handle.
///
/// The store handle is `Rc<RefCell<_>>`: everything runs on one logical
/// thread with suspension points only at the provider call and the simulated
/// typing delays, and no borrow is ever held across an await.
pub struct ConversationPipeline {
    store: Rc<RefCell<EntityStore>>,
    provider: Box<dyn CompletionProvider>,
    credentials: Box<dyn CredentialStore>,
    config: PipelineConfig,
    in_flight: RefCell<HashSet<CharacterId>>,
}

impl ConversationPipeline {
    pub fn new(
        store: Rc<RefCell<EntityStore>>,
        provider: Box<dyn CompletionProvider>,
        credentials: Box<dyn CredentialStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            config,
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    /// Whether a send for this character is currently in flight.
    pub fn is_busy(&self, character_id: CharacterId) -> bool {
        self.in_flight.borrow().contains(&character_id)
    }

    /// Drive one full round: commit the user message, obtain a reply, commit
    /// the reply with a strictly later timestamp.
    pub async fn send_message(
        &self,
        character_id: CharacterId,
        text: &str,
    ) -> Result<SendOutcome, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let _slot = InFlightSlot::acquire(&self.in_flight, character_id)?;

        let (name, personality, backstory) = {
            let store = self.store.borrow();
            let character = store
                .character(character_id)
                .ok_or(StoreError::CharacterNotFound(character_id))?;
            (
                character.name.clone(),
                character.personality,
                character.backstory.clone(),
            )
        };

        let user_message = self
            .store
            .borrow_mut()
            .add_message(character_id, text, true)?;

        let (reply_text, source) = self
            .generate_reply(&name, personality, &backstory, text)
            .await;

        let reply = self
            .store
            .borrow_mut()
            .add_message(character_id, &reply_text, false)?;

        tracing::debug!(
            character = %character_id,
            source = ?source,
            "reply committed"
        );

        Ok(SendOutcome {
            user_message,
            reply,
            source,
        })
    }

    async fn generate_reply(
        &self,
        name: &str,
        personality: Personality,
        backstory: &str,
        user_text: &str,
    ) -> (String, ReplySource) {
        if self.resolve_api_key().await.is_none() {
            tracing::debug!("no provider credential, using fallback generation");
            return (self.fallback_reply(personality).await, ReplySource::Fallback);
        }

        let system_prompt = build_system_prompt(name, personality, backstory);
        let options = CompletionOptions {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let result = timeout(
            self.config.request_timeout,
            self.provider.complete(&system_prompt, user_text, &options),
        )
        .await;

        match result {
            Ok(Ok(reply)) => {
                let reply = reply.trim();
                if reply.is_empty() {
                    (EMPTY_REPLY_PLACEHOLDER.to_string(), ReplySource::Provider)
                } else {
                    (reply.to_string(), ReplySource::Provider)
                }
            }
            Ok(Err(err)) if err.is_rate_limited() => {
                tracing::warn!(error = %err, "provider rate limited, downgrading to fallback");
                (self.fallback_reply(personality).await, ReplySource::Fallback)
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "provider failed, replying with error notice");
                (self.error_reply().await, ReplySource::ErrorNotice)
            }
            Err(_) => {
                tracing::warn!("provider timed out, replying with error notice");
                (self.error_reply().await, ReplySource::ErrorNotice)
            }
        }
    }

    /// Resolve a provider credential: build-time key first, then the user's
    /// stored key. Credential backend failures count as "no key".
    async fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.config.api_key {
            if !key.trim().is_empty() {
                return Some(key.clone());
            }
        }

        let user_id = self.config.user_id.as_deref()?;
        match self.credentials.get_stored_key(user_id).await {
            Ok(key) => key.filter(|k| !k.trim().is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "credential lookup failed");
                None
            }
        }
    }

    async fn fallback_reply(&self, personality: Personality) -> String {
        let (reply, delay) = {
            let mut rng = rand::thread_rng();
            (
                fallback::pick_reply(personality, &mut rng).to_string(),
                fallback::typing_delay(personality, &mut rng),
            )
        };
        sleep(delay).await;
        reply
    }

    async fn error_reply(&self) -> String {
        sleep(ERROR_REPLY_DELAY).await;
        ERROR_REPLY.to_string()
    }
}

/// The apologetic reply text, for hosts that want to recognize it.
pub fn error_reply_text() -> &'static str {
    ERROR_REPLY
}

/// The placeholder used when the provider returns empty content.
pub fn empty_reply_placeholder() -> &'static str {
    EMPTY_REPLY_PLACEHOLDER
}

fn build_system_prompt(name: &str, personality: Personality, backstory: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are {name}, a fictional character in a roleplay chat.\n"
    ));
    prompt.push_str(&format!(
        "Personality: {}. {}\n",
        personality.tag(),
        personality.style_hint()
    ));
    prompt.push_str("\nBackstory:\n");
    prompt.push_str(backstory);
    prompt.push_str(
        "\n\nStay in character at all times. Reply in first person as the character would, \
         keeping responses conversational and reasonably brief. Never mention being an AI.",
    );
    prompt
}

/// RAII marker for an in-flight send; the slot releases on drop, including
/// when the send future is cancelled.
struct InFlightSlot<'a> {
    set: &'a RefCell<HashSet<CharacterId>>,
    id: CharacterId,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(
        set: &'a RefCell<HashSet<CharacterId>>,
        id: CharacterId,
    ) -> Result<Self, SendError> {
        if !set.borrow_mut().insert(id) {
            return Err(SendError::Busy(id));
        }
        Ok(Self { set, id })
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.id);
    }
}
