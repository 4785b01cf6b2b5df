//! Preference keys and the rewrites that renumber or move them.

use crate::entities::CONVERSATION;
use quikdb_core::migration::{CrossEntitySnapshot, MigrationError, PreferenceEdits, PreferenceRewrite};
use std::collections::BTreeMap;
use tracing::debug;

/// Notification action slots.
pub const NOTIFICATION_ACTION_KEYS: [&str; 3] = ["notifAction1", "notifAction2", "notifAction3"];

/// Swipe action slots.
pub const SWIPE_ACTION_KEYS: [&str; 2] = ["swipeLeft", "swipeRight"];

/// Notification action values from version 10 on.
pub mod notification_action {
    pub const NONE: i64 = 0;
    pub const ARCHIVE: i64 = 1;
    pub const DELETE: i64 = 2;
    pub const BLOCK: i64 = 3;
    pub const CALL: i64 = 4;
    pub const READ: i64 = 5;
    pub const REPLY: i64 = 6;
    pub const SPEAK: i64 = 7;
}

/// Swipe action values from version 10 on.
pub mod swipe_action {
    pub const NONE: i64 = 0;
    pub const ARCHIVE: i64 = 1;
    pub const DELETE: i64 = 2;
    pub const BLOCK: i64 = 3;
    pub const CALL: i64 = 4;
    pub const READ: i64 = 5;
    pub const UNREAD: i64 = 6;
    pub const SPEAK: i64 = 7;
}

/// Preference key holding the theme color of a recipient (from version 9)
/// or of a conversation (before).
pub fn theme_key(id: impl std::fmt::Display) -> String {
    format!("theme_{}", id)
}

/// Map a pre-version-10 notification action to its current value.
pub fn migrate_notification_action(value: i64) -> i64 {
    match value {
        1 => notification_action::READ,
        2 => notification_action::REPLY,
        3 => notification_action::CALL,
        4 => notification_action::DELETE,
        other => other,
    }
}

/// Map a pre-version-10 swipe action to its current value.
pub fn migrate_swipe_action(value: i64) -> i64 {
    match value {
        2 => swipe_action::DELETE,
        3 => swipe_action::CALL,
        4 => swipe_action::READ,
        5 => swipe_action::UNREAD,
        other => other,
    }
}

/// Moves per-conversation themes onto each of the conversation's
/// recipients.
///
/// When two conversations share a recipient, the later conversation in key
/// order wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidateThemes;

impl PreferenceRewrite for ConsolidateThemes {
    fn rewrite(
        &self,
        snapshot: &CrossEntitySnapshot,
        prefs: &mut PreferenceEdits<'_>,
    ) -> Result<(), MigrationError> {
        let mut themes = BTreeMap::new();
        for conversation in snapshot.records(CONVERSATION) {
            let legacy = theme_key(&conversation.key);
            let Some(theme) = prefs.get_int(&legacy) else {
                continue;
            };
            for recipient in conversation.get_refs("recipients") {
                themes.insert(recipient.clone(), theme);
            }
            prefs.delete(legacy);
        }

        debug!(recipients = themes.len(), "consolidated conversation themes");
        for (recipient, theme) in themes {
            prefs.set(theme_key(recipient), theme);
        }
        Ok(())
    }
}

/// Renumbers the notification and swipe action preferences that are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenumberActions;

impl PreferenceRewrite for RenumberActions {
    fn rewrite(
        &self,
        _snapshot: &CrossEntitySnapshot,
        prefs: &mut PreferenceEdits<'_>,
    ) -> Result<(), MigrationError> {
        let slots = NOTIFICATION_ACTION_KEYS
            .iter()
            .map(|key| (*key, migrate_notification_action as fn(i64) -> i64))
            .chain(
                SWIPE_ACTION_KEYS
                    .iter()
                    .map(|key| (*key, migrate_swipe_action as fn(i64) -> i64)),
            );

        for (key, migrate) in slots {
            if let Some(value) = prefs.get_int(key) {
                prefs.set(key, migrate(value));
            }
        }
        Ok(())
    }
}
