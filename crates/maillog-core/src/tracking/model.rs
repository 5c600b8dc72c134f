//! Callback payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::NewLogEntry;

/// Provider acknowledgement of one accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendStatus {
    /// Message id assigned by the provider.
    pub message_id: String,
}

impl SendStatus {
    /// Creates a status for `message_id`.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }
}

/// A delivery or engagement event reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Event type (`queued`, `delivered`, `opened`, `clicked`, `bounced`, ...).
    pub event_type: String,
    /// Provider message id the event refers to.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Provider-assigned event id.
    #[serde(default)]
    pub event_id: Option<String>,
    /// When the event happened; receipt time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Reject reason for rejected or bounced messages.
    #[serde(default)]
    pub reject_reason: Option<String>,
    /// Response text from the receiving MTA.
    #[serde(default)]
    pub mta_response: Option<String>,
    /// Tags attached to the message.
    #[serde(default)]
    pub tags: Vec<String>,
    /// User agent for opens and clicks.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Clicked URL.
    #[serde(default)]
    pub click_url: Option<String>,
    /// Metadata attached to the message.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// The provider's raw payload.
    #[serde(default)]
    pub esp_event: serde_json::Value,
}

impl TrackingEvent {
    /// Creates an event of `event_type` for `message_id`.
    #[must_use]
    pub fn new(event_type: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            message_id: Some(message_id.into()),
            event_id: None,
            timestamp: None,
            reject_reason: None,
            mta_response: None,
            tags: Vec::new(),
            user_agent: None,
            click_url: None,
            metadata: serde_json::Value::Null,
            esp_event: serde_json::Value::Null,
        }
    }

    /// Log entry fields for this event as reported by `esp`.
    #[must_use]
    pub fn to_log_entry(&self, esp: &str) -> NewLogEntry {
        NewLogEntry {
            event_type: self.event_type.clone(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            esp: esp.to_string(),
            event_id: self.event_id.clone(),
            reject_reason: self.reject_reason.clone(),
            mta_response: self.mta_response.clone(),
            tags: self.tags.clone(),
            user_agent: self.user_agent.clone(),
            click_url: self.click_url.clone(),
            metadata: self.metadata.clone(),
            raw: self.esp_event.clone(),
        }
    }
}
