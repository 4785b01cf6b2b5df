//! Schema history of the quik message store.
//!
//! Holds the version-0 baseline, every migration step since, and the
//! collaborators those steps read from (the address book and the preference
//! keys). [`registry`] assembles them into the [`SchemaRegistry`] the engine
//! runs.

pub mod baseline;
pub mod contacts;
pub mod preferences;
pub mod steps;

pub use baseline::baseline;
pub use contacts::{ContactLookup, ContactNumber, InMemoryContacts, NoContacts};
pub use steps::steps;

use quikdb_core::migration::{MigrationError, SchemaRegistry};
use std::sync::Arc;

/// Current schema version of the message store.
pub const SCHEMA_VERSION: u64 = 15;

/// Entity names.
pub mod entities {
    pub const BLOCKED_NUMBER: &str = "BlockedNumber";
    pub const CONTACT: &str = "Contact";
    pub const CONTACT_GROUP: &str = "ContactGroup";
    pub const CONVERSATION: &str = "Conversation";
    pub const EMOJI_REACTION: &str = "EmojiReaction";
    pub const EMOJI_SYNC_NEEDED: &str = "EmojiSyncNeeded";
    pub const MESSAGE: &str = "Message";
    pub const MESSAGE_CONTENT_FILTER: &str = "MessageContentFilter";
    pub const MMS_PART: &str = "MmsPart";
    pub const PHONE_NUMBER: &str = "PhoneNumber";
    pub const RECIPIENT: &str = "Recipient";
    pub const SCHEDULED_MESSAGE: &str = "ScheduledMessage";
    pub const SYNC_LOG: &str = "SyncLog";
}

/// Build the message store registry.
///
/// `contacts` feeds the version-8 phone number rebuild.
pub fn registry(contacts: Arc<dyn ContactLookup>) -> Result<SchemaRegistry, MigrationError> {
    SchemaRegistry::build(baseline(), steps(contacts))
}
