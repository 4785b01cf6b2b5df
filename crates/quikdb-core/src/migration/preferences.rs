//! Preference rewrites committed with a migration step.

use super::error::MigrationError;
use super::snapshot::CrossEntitySnapshot;
use crate::storage::Value;
use std::collections::BTreeMap;

/// A step hook that edits application preferences.
///
/// Edits are buffered and committed in the same transaction as the step's
/// record changes, so a rewrite is applied exactly once.
pub trait PreferenceRewrite: Send + Sync {
    /// Buffer preference edits, reading records from the pre-step snapshot.
    fn rewrite(
        &self,
        snapshot: &CrossEntitySnapshot,
        prefs: &mut PreferenceEdits<'_>,
    ) -> Result<(), MigrationError>;
}

/// Buffered view over the store's preferences.
///
/// Reads see earlier buffered edits.
pub struct PreferenceEdits<'a> {
    current: &'a BTreeMap<String, Value>,
    pending: BTreeMap<String, Option<Value>>,
}

impl<'a> PreferenceEdits<'a> {
    /// Start buffering over the current preferences.
    pub fn new(current: &'a BTreeMap<String, Value>) -> Self {
        Self {
            current,
            pending: BTreeMap::new(),
        }
    }

    /// Read a preference.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.pending.get(name) {
            Some(pending) => pending.as_ref(),
            None => self.current.get(name),
        }
    }

    /// Read an integer preference.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    /// Check if a preference is set.
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a preference.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.pending.insert(name.into(), Some(value.into()));
    }

    /// Delete a preference.
    pub fn delete(&mut self, name: impl Into<String>) {
        self.pending.insert(name.into(), None);
    }

    /// Names of the set preferences starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .current
            .keys()
            .filter(|name| name.starts_with(prefix) && !self.pending.contains_key(*name))
            .cloned()
            .collect();
        names.extend(
            self.pending
                .iter()
                .filter(|(name, value)| name.starts_with(prefix) && value.is_some())
                .map(|(name, _)| name.clone()),
        );
        names.sort();
        names
    }

    /// Number of buffered edits.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the buffered edits. `None` marks a deletion.
    pub fn into_edits(self) -> BTreeMap<String, Option<Value>> {
        self.pending
    }
}

/// A [`PreferenceRewrite`] backed by a closure.
pub struct FnPreferenceRewrite<F>(F);

/// Wrap a closure as a [`PreferenceRewrite`].
pub fn preference_fn<F>(f: F) -> FnPreferenceRewrite<F>
where
    F: Fn(&CrossEntitySnapshot, &mut PreferenceEdits<'_>) -> Result<(), MigrationError>
        + Send
        + Sync,
{
    FnPreferenceRewrite(f)
}

impl<F> PreferenceRewrite for FnPreferenceRewrite<F>
where
    F: Fn(&CrossEntitySnapshot, &mut PreferenceEdits<'_>) -> Result<(), MigrationError>
        + Send
        + Sync,
{
    fn rewrite(
        &self,
        snapshot: &CrossEntitySnapshot,
        prefs: &mut PreferenceEdits<'_>,
    ) -> Result<(), MigrationError> {
        (self.0)(snapshot, prefs)
    }
}
