//! Typed header names for AMI stanzas.

/// Error returned when parsing an unrecognized header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAmiHeaderError(pub String);

impl std::fmt::Display for ParseAmiHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown AMI header: {}", self.0)
    }
}

impl std::error::Error for ParseAmiHeaderError {}

define_header_enum! {
    error_type: ParseAmiHeaderError,
    /// Well-known header names used in AMI actions, responses and events.
    ///
    /// Field lookups on received messages are case-sensitive, so these carry
    /// the capitalisation Asterisk sends. Use with
    /// [`AmiResponse::field()`](crate::AmiResponse::field) and friends.
    pub enum AmiHeader {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Event => "Event",
        Message => "Message",
        EventList => "EventList",
        ListItems => "ListItems",
        Privilege => "Privilege",
        Username => "Username",
        Secret => "Secret",
        Events => "Events",
        Command => "Command",
        Output => "Output",
        Ping => "Ping",
        Timestamp => "Timestamp",
        Channel => "Channel",
        Uniqueid => "Uniqueid",
        Cause => "Cause",
    }
}
