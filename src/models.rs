use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub content: String,
    pub original_content: String,
    pub thread_id: i64,
    pub date: DateTime<Utc>,
    pub from: EmailAddress,
    /// Message id assigned by the mail server, preferred for reply linking.
    #[serde(default)]
    pub imap_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Per-user annotation filled in by the store, never persisted on the row.
    #[serde(default)]
    pub was_read: bool,
}

impl Message {
    /// The key other messages use to reply to this one.
    pub fn effective_id(&self) -> &str {
        self.imap_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    pub fn mark_as_read(&mut self) {
        self.was_read = true;
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }
}
