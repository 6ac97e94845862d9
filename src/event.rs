//! AMI event type

use crate::constants::EVENT_LIST_COMPLETE;
use crate::headers::AmiHeader;
use crate::message::Fields;
use serde::{Deserialize, Serialize};

/// Unsolicited notification pushed by the server (`Event: <name>` stanza).
///
/// The `Event:` line itself is not part of [`fields`](Self::fields); its
/// value is the event [`name`](Self::name). Events caused by an action
/// carry that action's `ActionID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiEvent {
    name: String,
    fields: Fields,
}

impl AmiEvent {
    /// Create an event with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
        }
    }

    /// Create an event from an already-parsed field map.
    pub fn from_fields(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Builder-style [`set_field`](Self::set_field).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Event name, e.g. `Hangup` or `PeerEntry`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a field by its exact (case-sensitive) name.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Set a field; a later value for the same name replaces the earlier one.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .insert(name.into(), value.into());
    }

    /// `ActionID` of the action that caused this event, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.field(AmiHeader::ActionId)
    }

    /// `true` if this event closes a correlated burst (`EventList: Complete`).
    pub fn is_list_complete(&self) -> bool {
        self.field(AmiHeader::EventList)
            .is_some_and(|v| v.eq_ignore_ascii_case(EVENT_LIST_COMPLETE))
    }
}
