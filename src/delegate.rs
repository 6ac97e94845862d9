//! Message observers

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::{
    connection::{AmiStream, StreamState},
    error::AmiError,
    message::AmiMessage,
};

/// Observer receiving every message of a stream, in wire order, including
/// the synthetic [`Connected`](AmiMessage::Connected) and
/// [`Disconnected`](AmiMessage::Disconnected) markers.
///
/// `on_message` runs on the stream's engine loop, so it must not block. It may
/// issue new actions by spawning a task that calls
/// [`AmiStream::send_action`]; the loop keeps draining the socket while that
/// task waits:
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{AmiAction, AmiConnectOptions, AmiMessage, AmiStream};
///
/// # async fn example() -> Result<(), asterisk_ami_tokio::AmiError> {
/// let options = AmiConnectOptions::new("127.0.0.1", 5038).credentials("admin", "secret");
/// let stream = AmiStream::new(options, |message: &AmiMessage, stream: &AmiStream| {
///     if let AmiMessage::Connected = message {
///         let stream = stream.clone();
///         tokio::spawn(async move {
///             let _ = stream.send_action(AmiAction::new("CoreStatus")).await;
///         });
///     }
/// })?;
/// stream.wait_ready().await?;
/// # Ok(())
/// # }
/// ```
pub trait AmiDelegate: Send + Sync + 'static {
    /// Called once per message.
    fn on_message(&self, message: &AmiMessage, stream: &AmiStream);
}

impl<F> AmiDelegate for F
where
    F: Fn(&AmiMessage, &AmiStream) + Send + Sync + 'static,
{
    fn on_message(&self, message: &AmiMessage, stream: &AmiStream) {
        self(message, stream)
    }
}

/// Delegate feeding an [`AmiMessageStream`].
///
/// The queue is bounded. When it is full the message is dropped, the
/// overflow flag is set and the stream's drop counter incremented; the next
/// successful dispatch is preceded by a single `Err(AmiError::QueueFull)`.
/// [`AmiMessage::Disconnected`] is never dropped: if the queue is full it is
/// handed to a task that waits for room, after any pending `QueueFull`.
pub(crate) struct ChannelDelegate {
    tx: mpsc::Sender<Result<AmiMessage, AmiError>>,
    overflow: AtomicBool,
}

impl ChannelDelegate {
    pub(crate) fn new(tx: mpsc::Sender<Result<AmiMessage, AmiError>>) -> Self {
        Self {
            tx,
            overflow: AtomicBool::new(false),
        }
    }
}

impl AmiDelegate for ChannelDelegate {
    fn on_message(&self, message: &AmiMessage, stream: &AmiStream) {
        if self
            .overflow
            .load(Ordering::Relaxed)
        {
            match self
                .tx
                .try_send(Err(AmiError::QueueFull))
            {
                Ok(()) => {
                    self.overflow
                        .store(false, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {}
            }
        }

        match self
            .tx
            .try_send(Ok(message.clone()))
        {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Message stream dropped, discarding {}", message);
            }
            Err(mpsc::error::TrySendError::Full(item))
                if matches!(message, AmiMessage::Disconnected) =>
            {
                let overflowed = self
                    .overflow
                    .swap(false, Ordering::Relaxed);
                let tx = self
                    .tx
                    .clone();
                debug!("Message queue full, deferring {}", message);
                tokio::spawn(async move {
                    if overflowed
                        && tx
                            .send(Err(AmiError::QueueFull))
                            .await
                            .is_err()
                    {
                        return;
                    }
                    let _ = tx
                        .send(item)
                        .await;
                });
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow
                    .store(true, Ordering::Relaxed);
                stream.record_dropped_message();
                warn!("Message queue full, dropping {}", message);
            }
        }
    }
}

/// Receiving half returned by [`AmiStream::connect`] (!Clone).
///
/// Yields every message of the stream in wire order, ending with
/// [`AmiMessage::Disconnected`] followed by `None`. An
/// `Err(AmiError::QueueFull)` means messages were dropped because the
/// consumer fell behind; see [`AmiStream::dropped_message_count`].
pub struct AmiMessageStream {
    rx: mpsc::Receiver<Result<AmiMessage, AmiError>>,
    status_rx: watch::Receiver<StreamState>,
}

impl std::fmt::Debug for AmiMessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiMessageStream")
            .field("state", &self.state())
            .finish()
    }
}

impl AmiMessageStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<AmiMessage, AmiError>>,
        status_rx: watch::Receiver<StreamState>,
    ) -> Self {
        Self { rx, status_rx }
    }

    /// Receive the next message, or `None` once the stream has stopped and
    /// every queued message has been read.
    pub async fn recv(&mut self) -> Option<Result<AmiMessage, AmiError>> {
        self.rx
            .recv()
            .await
    }

    /// Whether the underlying stream has not yet stopped.
    pub fn is_alive(&self) -> bool {
        !matches!(
            *self
                .status_rx
                .borrow(),
            StreamState::Stopped(_)
        )
    }

    /// Current state snapshot.
    pub fn state(&self) -> StreamState {
        self.status_rx
            .borrow()
            .clone()
    }
}

impl futures_util::Stream for AmiMessageStream {
    type Item = Result<AmiMessage, AmiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
