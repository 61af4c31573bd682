//! Roleplay chat engine: persisted character/conversation store and the
//! message-dispatch pipeline.
//!
//! This crate provides:
//! - An entity store owning characters and their conversations, with
//!   write-through persistence and derived views (filtering, sorting,
//!   statistics, export/import)
//! - A conversation pipeline that commits a user message, obtains a reply
//!   from a live completion provider or a deterministic local fallback, and
//!   commits the reply under strict ordering guarantees
//!
//! # Quick Start
//!
//! ```ignore
//! use ember_core::{
//!     CharacterDraft, ConversationPipeline, EntityStore, JsonFileStore,
//!     Personality, PipelineConfig,
//! };
//! use ember_core::credentials::InMemoryCredentials;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Rc::new(RefCell::new(EntityStore::open(Box::new(
//!         JsonFileStore::new("chat_state.json"),
//!     ))?));
//!
//!     let id = store.borrow_mut().create_character(CharacterDraft::new(
//!         "Nova",
//!         Personality::Sarcastic,
//!         "A ship AI that outlived its crew and now trades barbs for fuel.",
//!     ))?;
//!
//!     let provider = completion::Anthropic::from_env()?;
//!     let pipeline = ConversationPipeline::new(
//!         Rc::clone(&store),
//!         Box::new(provider),
//!         Box::new(InMemoryCredentials::new()),
//!         PipelineConfig::new().with_api_key(std::env::var("ANTHROPIC_API_KEY")?),
//!     );
//!
//!     let outcome = pipeline.send_message(id, "hi").await?;
//!     println!("{}", outcome.reply.text);
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod credentials;
pub mod fallback;
pub mod message;
pub mod persist;
pub mod pipeline;
pub mod store;
pub mod testing;

// Primary public API
pub use character::{Character, CharacterDraft, CharacterId, CharacterUpdate, Personality};
pub use message::{Message, MessageId};
pub use persist::{ExportData, JsonFileStore, MemoryStateStore, PersistError, StateStore};
pub use pipeline::{
    ConversationPipeline, PipelineConfig, ReplySource, SendError, SendOutcome,
};
pub use store::{CharacterSort, EntityStore, StoreError, StoreState, StoreStats};
