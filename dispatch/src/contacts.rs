//! Contact store: the list of people an alert fans out to.
//!
//! Only an in-memory backend ships here. The dispatcher reads a fresh
//! snapshot per dispatch and never holds a lock across provider calls, so
//! contacts may change between attempts of one escalation.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::Contact;

/// Error types for contact store operations
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("{0}")]
    Validation(String),

    #[error("Contact not found")]
    NotFound(String),

    #[error("Contact storage unavailable: {0}")]
    Storage(String),
}

pub type ContactResult<T> = Result<T, ContactError>;

/// Shared reference to a contact store
pub type SharedContactStore = Arc<dyn ContactStore>;

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Snapshot of all contacts, in insertion order.
    async fn list(&self) -> ContactResult<Vec<Contact>>;

    /// Validate and insert a contact, returning the stored record.
    async fn add(&self, name: &str, phone: &str) -> ContactResult<Contact>;

    async fn delete(&self, id: &str) -> ContactResult<()>;

    /// Remove every contact, returning how many were removed.
    async fn clear(&self) -> ContactResult<usize>;
}

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[1-9]\d{6,14}$").expect("PHONE_RE regex should compile")
});

/// Strip formatting characters and check the number is E.164-like.
///
/// Returns the normalised number (`+1 (555) 123-4567` → `+15551234567`).
pub fn normalize_phone(raw: &str) -> ContactResult<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if cleaned.is_empty() {
        return Err(ContactError::Validation(
            "Name and phone required".to_string(),
        ));
    }
    if !PHONE_RE.is_match(&cleaned) {
        return Err(ContactError::Validation(format!(
            "Invalid phone number: {raw}"
        )));
    }
    Ok(cleaned)
}

/// Validate a new contact's fields and return `(name, phone)` normalised.
pub fn validate_contact(name: &str, phone: &str) -> ContactResult<(String, String)> {
    let name = name.trim();
    if name.is_empty() || phone.trim().is_empty() {
        return Err(ContactError::Validation(
            "Name and phone required".to_string(),
        ));
    }
    Ok((name.to_string(), normalize_phone(phone)?))
}

#[derive(Default)]
pub struct InMemoryContactStore {
    contacts: RwLock<Vec<Contact>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedContactStore {
        Arc::new(self)
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn list(&self) -> ContactResult<Vec<Contact>> {
        Ok(self.contacts.read().await.clone())
    }

    async fn add(&self, name: &str, phone: &str) -> ContactResult<Contact> {
        let (name, phone) = validate_contact(name, phone)?;
        let contact = Contact {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            phone,
        };
        debug!(id = %contact.id, phone = %contact.phone, "Contact added");
        self.contacts.write().await.push(contact.clone());
        Ok(contact)
    }

    async fn delete(&self, id: &str) -> ContactResult<()> {
        let mut contacts = self.contacts.write().await;
        let idx = contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ContactError::NotFound(id.to_string()))?;
        contacts.remove(idx);
        debug!(id, "Contact deleted");
        Ok(())
    }

    async fn clear(&self) -> ContactResult<usize> {
        let mut contacts = self.contacts.write().await;
        let removed = contacts.len();
        contacts.clear();
        Ok(removed)
    }
}
