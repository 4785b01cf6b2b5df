//! Contact lookup used to repopulate phone numbers.
//!
//! The address book lives outside the store. Version 8 rebuilds every
//! contact's numbers from it, keyed by the address book's own number ids.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// One phone number as the address book reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContactNumber {
    /// Address book id of the number. Becomes the phone number's key.
    pub id: i64,
    /// The number itself.
    pub address: String,
    /// Label such as "Mobile" or "Work".
    #[serde(default, rename = "type")]
    pub number_type: String,
    /// Account the number is synced from.
    #[serde(default)]
    pub account_type: Option<String>,
    /// Photo of the contact row this number came from.
    #[serde(default)]
    pub photo_uri: Option<String>,
}

/// Source of contact numbers, keyed by contact lookup key.
pub trait ContactLookup: Send + Sync {
    /// Numbers of the contact with `lookup_key`.
    ///
    /// `None` when the address book is unavailable or has no such contact.
    fn lookup(&self, lookup_key: &str) -> Option<Vec<ContactNumber>>;
}

/// Lookup with no address book. Every contact ends up without numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContacts;

impl ContactLookup for NoContacts {
    fn lookup(&self, _lookup_key: &str) -> Option<Vec<ContactNumber>> {
        None
    }
}

/// Address book held in memory.
///
/// Number ids are unique across the whole book: a number added a second
/// time, under any contact, is ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContacts {
    contacts: HashMap<String, Vec<ContactNumber>>,
    ids: HashSet<i64>,
}

impl InMemoryContacts {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a number to a contact. Returns false if the id was already taken.
    pub fn add(&mut self, lookup_key: impl Into<String>, number: ContactNumber) -> bool {
        if !self.ids.insert(number.id) {
            return false;
        }
        self.contacts.entry(lookup_key.into()).or_default().push(number);
        true
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, lookup_key: impl Into<String>, number: ContactNumber) -> Self {
        self.add(lookup_key, number);
        self
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check if the book is empty.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

impl FromIterator<(String, ContactNumber)> for InMemoryContacts {
    fn from_iter<I: IntoIterator<Item = (String, ContactNumber)>>(iter: I) -> Self {
        let mut contacts = Self::new();
        for (lookup_key, number) in iter {
            contacts.add(lookup_key, number);
        }
        contacts
    }
}

impl ContactLookup for InMemoryContacts {
    fn lookup(&self, lookup_key: &str) -> Option<Vec<ContactNumber>> {
        self.contacts.get(lookup_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(id: i64, address: &str) -> ContactNumber {
        ContactNumber {
            id,
            address: address.to_string(),
            number_type: "Mobile".to_string(),
            account_type: None,
            photo_uri: None,
        }
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let mut contacts = InMemoryContacts::new();
        assert!(contacts.add("alice", number(1, "5550001")));
        assert!(contacts.add("alice", number(2, "5550002")));
        assert!(!contacts.add("bob", number(1, "5550001")));

        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts.lookup("alice").map(|n| n.len()), Some(2));
        assert_eq!(contacts.lookup("bob"), None);
        assert_eq!(NoContacts.lookup("alice"), None);
    }

    #[test]
    fn test_deserialize_number() {
        let json = r#"{"id": 7, "address": "5550007", "type": "Work"}"#;
        let parsed: ContactNumber = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.number_type, "Work");
        assert_eq!(parsed.account_type, None);
    }
}
