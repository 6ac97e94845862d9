//! Actions (client requests) and their wire serialisation

use crate::{
    constants::LINE_TERMINATOR,
    error::{AmiError, AmiResult},
    headers::AmiHeader,
};
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// AMI stanzas are line-delimited; embedded newlines would allow injection
/// of arbitrary headers or whole actions.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::protocol_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

fn validate_name(s: &str, context: &str) -> AmiResult<()> {
    validate_no_newlines(s, context)?;
    if s.is_empty() || s.contains(':') {
        return Err(AmiError::protocol_error(format!(
            "{} must be non-empty and must not contain ':'",
            context
        )));
    }
    Ok(())
}

/// Generate a fresh `ActionID`.
pub(crate) fn new_action_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A request sent to the server.
///
/// Headers are written in insertion order after the `Action` and `ActionID`
/// lines. Repeated header names are kept (AMI uses them for e.g. `Variable`).
///
/// ```
/// use asterisk_ami_tokio::AmiAction;
///
/// let action = AmiAction::new("Command")
///     .header("Command", "core show version").unwrap();
/// let wire = action.to_wire_format("abc-123").unwrap();
/// assert_eq!(
///     wire,
///     "Action: Command\r\nActionID: abc-123\r\nCommand: core show version\r\n\r\n"
/// );
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AmiAction {
    name: String,
    action_id: Option<String>,
    headers: Vec<(String, String)>,
}

impl AmiAction {
    /// Start building an action with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_id: None,
            headers: Vec::new(),
        }
    }

    /// Add a header.
    ///
    /// A header named `ActionID` (any case) sets the action id instead.
    /// Returns an error if the name or value contains newline characters.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> AmiResult<Self> {
        let name = name.as_ref();
        let value = value.into();
        validate_name(name, "header name")?;
        validate_no_newlines(&value, "header value")?;
        if name.eq_ignore_ascii_case(AmiHeader::ActionId.as_str()) {
            self.action_id = Some(value);
        } else {
            self.headers
                .push((name.to_string(), value));
        }
        Ok(self)
    }

    /// Add several headers, in iteration order.
    pub fn headers<I, K, V>(mut self, headers: I) -> AmiResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self = self.header(k, v)?;
        }
        Ok(self)
    }

    /// Use a caller-chosen `ActionID` instead of a generated one.
    ///
    /// It must not collide with another action still outstanding on the
    /// same stream.
    pub fn with_action_id(mut self, action_id: impl Into<String>) -> AmiResult<Self> {
        let action_id = action_id.into();
        validate_no_newlines(&action_id, "ActionID")?;
        self.action_id = Some(action_id);
        Ok(self)
    }

    /// `Action: Login` with event delivery turned on.
    pub fn login(username: &str, secret: &str) -> AmiResult<Self> {
        AmiAction::new("Login")
            .header(AmiHeader::Username, username)?
            .header(AmiHeader::Secret, secret)?
            .header(AmiHeader::Events, "On")
    }

    /// `Action: Ping`.
    pub fn ping() -> Self {
        AmiAction::new("Ping")
    }

    /// `Action: Logoff`.
    pub fn logoff() -> Self {
        AmiAction::new("Logoff")
    }

    /// `Action: Command` running a CLI command; the output arrives as a follows body.
    pub fn command(cli: &str) -> AmiResult<Self> {
        AmiAction::new("Command").header(AmiHeader::Command, cli)
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Caller-supplied `ActionID`, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.action_id
            .as_deref()
    }

    /// Headers in insertion order.
    pub fn header_pairs(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Serialise with the given `ActionID`.
    pub fn to_wire_format(&self, action_id: &str) -> AmiResult<String> {
        use std::fmt::Write;

        validate_name(&self.name, "action name")?;
        validate_no_newlines(action_id, "ActionID")?;

        let mut result = String::new();
        let _ = write!(
            result,
            "{}: {}{}",
            AmiHeader::Action,
            self.name,
            LINE_TERMINATOR
        );
        let _ = write!(
            result,
            "{}: {}{}",
            AmiHeader::ActionId,
            action_id,
            LINE_TERMINATOR
        );
        for (key, value) in &self.headers {
            let _ = write!(result, "{}: {}{}", key, value, LINE_TERMINATOR);
        }
        result.push_str(LINE_TERMINATOR);
        Ok(result)
    }
}

impl fmt::Debug for AmiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(AmiHeader::Secret.as_str()) {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("AmiAction")
            .field("name", &self.name)
            .field("action_id", &self.action_id)
            .field("headers", &headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_without_headers() {
        let wire = AmiAction::new("Command")
            .to_wire_format("id-1")
            .unwrap();
        assert_eq!(wire, "Action: Command\r\nActionID: id-1\r\n\r\n");
    }

    #[test]
    fn test_wire_format_preserves_header_order() {
        let wire = AmiAction::new("Originate")
            .header("Channel", "SIP/101")
            .unwrap()
            .header("Exten", "1000")
            .unwrap()
            .header("Variable", "a=1")
            .unwrap()
            .header("Variable", "b=2")
            .unwrap()
            .to_wire_format("id-2")
            .unwrap();
        assert_eq!(
            wire,
            "Action: Originate\r\nActionID: id-2\r\nChannel: SIP/101\r\nExten: 1000\r\nVariable: a=1\r\nVariable: b=2\r\n\r\n"
        );
    }

    #[test]
    fn test_login_wire_format() {
        let wire = AmiAction::login("fred", "jones")
            .unwrap()
            .to_wire_format("id-3")
            .unwrap();
        assert_eq!(
            wire,
            "Action: Login\r\nActionID: id-3\r\nUsername: fred\r\nSecret: jones\r\nEvents: On\r\n\r\n"
        );
    }

    #[test]
    fn test_action_id_header_sets_id() {
        let action = AmiAction::new("Status")
            .header("actionid", "mine")
            .unwrap();
        assert_eq!(action.action_id(), Some("mine"));
        assert!(action
            .header_pairs()
            .is_empty());
    }

    #[test]
    fn test_newline_injection_rejected() {
        assert!(AmiAction::new("Command")
            .header("Command", "core show version\r\n\r\nAction: Logoff")
            .is_err());
        assert!(AmiAction::new("Command")
            .header("Bad\nName", "x")
            .is_err());
        assert!(AmiAction::new("Command")
            .with_action_id("a\r\nb")
            .is_err());
        assert!(AmiAction::new("Bad\r\nAction")
            .to_wire_format("id")
            .is_err());
    }

    #[test]
    fn test_colon_in_header_name_rejected() {
        assert!(AmiAction::new("Command")
            .header("Key: Value", "x")
            .is_err());
        assert!(AmiAction::new("")
            .to_wire_format("id")
            .is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let login = AmiAction::login("admin", "s3cr3t").unwrap();
        let debug_str = format!("{:?}", login);
        assert!(!debug_str.contains("s3cr3t"));
        assert!(debug_str.contains("REDACTED"));
        assert!(debug_str.contains("admin"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = new_action_id();
        let b = new_action_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
