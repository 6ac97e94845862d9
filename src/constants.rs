//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from the transport (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Initial receive buffer allocation (64KB)
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum total receive buffer size (16MB) - safety limit to prevent runaway memory.
/// A `Response: Follows` body whose sentinel never arrives is the usual way to hit it.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Stanza terminator (blank line)
pub const STANZA_TERMINATOR: &str = "\r\n\r\n";
/// Line terminator
pub const LINE_TERMINATOR: &str = "\r\n";

/// Prefix of the greeting line sent once at connection start
pub const BANNER_PREFIX: &str = "Asterisk Call Manager/";

/// Sentinel line closing the free-text body of a `Response: Follows`
pub const FOLLOWS_SENTINEL: &str = "--END COMMAND--";

/// `Message` value of a placeholder response announcing a burst of correlated events
pub const EVENTS_TO_FOLLOW: &str = "Events to follow";

/// `EventList` value marking the last event of a correlated burst
pub const EVENT_LIST_COMPLETE: &str = "Complete";

/// Connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Maximum number of queued messages in an [`AmiMessageStream`](crate::AmiMessageStream)
/// before dropping
pub const MAX_MESSAGE_QUEUE_SIZE: usize = 1000;
