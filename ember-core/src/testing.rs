//! Testing utilities for the chat engine.
//!
//! This module provides tools for integration testing:
//! - `MockProvider` for deterministic testing without API calls
//! - `TestHarness` wiring a mock provider to an in-memory store
//! - A failing state store for persistence-error scenarios

use crate::character::{CharacterDraft, CharacterId, Personality};
use crate::credentials::InMemoryCredentials;
use crate::message::Message;
use crate::persist::{PersistError, StateStore};
use crate::pipeline::{ConversationPipeline, PipelineConfig, SendError, SendOutcome};
use crate::store::{EntityStore, StoreState};
use async_trait::async_trait;
use completion::{CompletionOptions, CompletionProvider, Error as CompletionError};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

/// A scripted provider behavior.
#[derive(Debug, Clone)]
pub enum MockCompletion {
    /// Succeed with this reply text.
    Reply(String),
    /// Succeed with empty content.
    Empty,
    /// Fail with a quota/rate-limit error.
    RateLimited,
    /// Fail with a non-quota error.
    Fail(String),
    /// Never resolve; used with virtual time to exercise the timeout.
    Hang,
}

/// A recorded provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub user_message: String,
}

/// A completion provider that returns scripted behaviors in order.
///
/// Clones share the same script and call log, so a harness can keep a handle
/// while the pipeline owns the boxed trait object.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<MockCompletion>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next scripted behavior.
    pub fn queue(&self, completion: MockCompletion) {
        self.script
            .lock()
            .expect("mock script poisoned")
            .push_back(completion);
    }

    /// Queue a plain successful reply.
    pub fn queue_reply(&self, text: impl Into<String>) {
        self.queue(MockCompletion::Reply(text.into()));
    }

    /// All calls the pipeline has made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock call log poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock call log poisoned").len()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                user_message: user_message.to_string(),
            });

        let next = self
            .script
            .lock()
            .expect("mock script poisoned")
            .pop_front();

        match next {
            Some(MockCompletion::Reply(text)) => Ok(text),
            Some(MockCompletion::Empty) => Ok(String::new()),
            Some(MockCompletion::RateLimited) => Err(CompletionError::Api {
                status: 429,
                message: "rate_limit_error: quota exhausted".to_string(),
            }),
            Some(MockCompletion::Fail(message)) => Err(CompletionError::Api {
                status: 500,
                message,
            }),
            Some(MockCompletion::Hang) => std::future::pending().await,
            None => Ok("The provider has no more scripted replies.".to_string()),
        }
    }
}

/// A state store that starts failing after a set number of saves.
#[derive(Debug, Default)]
pub struct FailingStateStore {
    saves_before_failure: Cell<usize>,
}

impl FailingStateStore {
    /// Fails every save from the start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `n` saves, then fails with `QuotaExceeded`.
    pub fn after(n: usize) -> Self {
        Self {
            saves_before_failure: Cell::new(n),
        }
    }
}

impl StateStore for FailingStateStore {
    fn load_state(&self) -> Result<Option<StoreState>, PersistError> {
        Ok(None)
    }

    fn save_state(&self, _state: &StoreState) -> Result<(), PersistError> {
        let remaining = self.saves_before_failure.get();
        if remaining == 0 {
            return Err(PersistError::QuotaExceeded);
        }
        self.saves_before_failure.set(remaining - 1);
        Ok(())
    }
}

/// Test harness wiring a mock provider and in-memory store to a pipeline.
pub struct TestHarness {
    pub store: Rc<RefCell<EntityStore>>,
    pub pipeline: ConversationPipeline,
    pub provider: MockProvider,
}

impl TestHarness {
    /// Harness with a configured provider key, so sends take the provider
    /// path.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::new().with_api_key("test-key"))
    }

    /// Harness with no credential anywhere: every send falls back to local
    /// generation.
    pub fn without_key() -> Self {
        Self::with_config(PipelineConfig::new())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let store = Rc::new(RefCell::new(EntityStore::in_memory()));
        let provider = MockProvider::new();
        let pipeline = ConversationPipeline::new(
            Rc::clone(&store),
            Box::new(provider.clone()),
            Box::new(InMemoryCredentials::new()),
            config,
        );

        Self {
            store,
            pipeline,
            provider,
        }
    }

    /// Create a character with a backstory long enough for the creation flow.
    pub fn create_character(&self, name: &str, personality: Personality) -> CharacterId {
        let draft = CharacterDraft::new(
            name,
            personality,
            format!("{name} has a long and winding history, most of it invented on the spot."),
        );
        self.store
            .borrow_mut()
            .create_character(draft)
            .expect("character creation failed")
    }

    /// Send one message through the pipeline.
    pub async fn send(
        &self,
        character_id: CharacterId,
        text: &str,
    ) -> Result<SendOutcome, SendError> {
        self.pipeline.send_message(character_id, text).await
    }

    /// All messages for a character, in order.
    pub fn messages(&self, character_id: CharacterId) -> Vec<Message> {
        self.store.borrow().get_messages(character_id)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
