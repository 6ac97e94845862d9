//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface,
//! allowing applications to log in, send actions and receive events over a
//! single persistent connection.
//!
//! # Architecture
//!
//! One background engine task per connection owns the socket:
//! - [`AmiStream`] (Clone + Send): send actions from any task; replies are
//!   matched to callers by `ActionID`, so concurrent actions may complete in
//!   any order
//! - [`AmiDelegate`]: observer called on the engine task for every message,
//!   in wire order
//! - [`AmiMessageStream`]: channel-backed alternative to a delegate
//!
//! # Examples
//!
//! ## Sending actions
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiAction, AmiConnectOptions, AmiError, AmiStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let options = AmiConnectOptions::new("localhost", 5038).credentials("admin", "amp111");
//!     let (stream, _messages) = AmiStream::connect(options)?;
//!     stream.wait_ready().await?;
//!     println!("Asterisk {}", stream.version().unwrap_or("?"));
//!
//!     let output = stream.command("core show uptime").await?;
//!     println!("{}", output);
//!
//!     // Causal actions complete once the whole event list arrived
//!     let peers = stream.send_action(AmiAction::new("SIPpeers")).await?;
//!     for peer in peers.events() {
//!         println!("{:?}", peer.field("ObjectName"));
//!     }
//!
//!     stream.logoff().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Receiving events
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiConnectOptions, AmiMessage, AmiStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AmiConnectOptions::new("localhost", 5038).credentials("admin", "amp111");
//!     let stream = AmiStream::new(options, |message: &AmiMessage, _: &AmiStream| {
//!         if let AmiMessage::Event(event) = message {
//!             println!("{} {:?}", event.name(), event.field("Channel"));
//!         }
//!     })?;
//!
//!     stream.wait_stopped().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Handling action errors
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiAction, AmiStream};
//!
//! # async fn example(stream: AmiStream) -> Result<(), asterisk_ami_tokio::AmiError> {
//! let action = AmiAction::new("Hangup").header("Channel", "SIP/101-00000001")?;
//! let reply = stream
//!     .send_action_with_handler(action, |error| {
//!         eprintln!("hangup failed: {:?}", error.message());
//!     })
//!     .await?;
//! if let Some(response) = reply {
//!     println!("{:?}", response.message());
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

pub mod action;
pub mod connection;
pub mod constants;
pub mod delegate;
pub mod error;
pub mod event;
pub mod headers;
pub mod message;
pub mod protocol;

pub(crate) mod buffer;

pub use action::AmiAction;
pub use connection::{AmiConnectOptions, AmiStream, DisconnectReason, StreamState};
pub use constants::DEFAULT_AMI_PORT;
pub use delegate::{AmiDelegate, AmiMessageStream};
pub use error::{AmiError, AmiResult};
pub use event::AmiEvent;
pub use headers::{AmiHeader, ParseAmiHeaderError};
pub use message::{AmiErrorResponse, AmiMessage, AmiPong, AmiResponse, Fields};
pub use protocol::{AmiLexer, LexedItem};
