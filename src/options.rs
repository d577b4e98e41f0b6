use std::time::Duration;

use crate::{Result, WebSocketError};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a larger payload are rejected to keep a misbehaving peer from
/// exhausting memory.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum size of a reassembled fragmented message, set to 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Time allowed for the peer's close frame and end of stream to arrive after this
/// client sent its own close frame, before the socket is torn down.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Reason sent with the close frame of [`WebSocketClient::close`](crate::WebSocketClient::close).
pub const NORMAL_CLOSE_REASON: &str =
    "the purpose for which the connection was established has been fulfilled.";

/// Payload of the pings sent by the heartbeat timer.
pub const HEARTBEAT_PAYLOAD: &str = "heartbeat";

/// Configuration options for a WebSocket connection.
///
/// ```rust
/// use std::time::Duration;
/// use wsclient::Options;
///
/// let options = Options::default()
///     .with_heartbeat_interval(Duration::from_secs(15))
///     .with_idle_timeout(Duration::from_secs(45))
///     .with_connect_timeout(Duration::from_secs(10));
///
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Interval between heartbeat pings. `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Maximum time without any read or write before the connection is dropped.
    /// `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// Maximum time to open the socket and complete the handshake.
    pub connect_timeout: Option<Duration>,
    /// Delay between sending a close frame and tearing the socket down.
    pub close_grace_period: Duration,
    /// Maximum payload size of a single incoming frame.
    pub max_payload_read: usize,
    /// Maximum size of a reassembled incoming message.
    pub max_read_buffer: usize,
    /// Sets `TCP_NODELAY` on sockets opened by the client.
    pub no_delay: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            idle_timeout: None,
            connect_timeout: None,
            close_grace_period: CLOSE_GRACE_PERIOD,
            max_payload_read: MAX_PAYLOAD_READ,
            max_read_buffer: MAX_READ_BUFFER,
            no_delay: true,
        }
    }
}

impl Options {
    /// Sends a ping every `interval` once the connection is open. `interval` must not
    /// be zero.
    ///
    /// The connection is dropped when the oldest unanswered ping is older than one
    /// interval.
    pub fn with_heartbeat_interval(self, interval: Duration) -> Self {
        Self {
            heartbeat_interval: Some(interval),
            ..self
        }
    }

    /// Drops the connection when nothing was read or written for `timeout`.
    ///
    /// When a heartbeat is configured too, `timeout` must be at least twice the
    /// heartbeat interval; [`validate`](Self::validate) enforces this.
    pub fn with_idle_timeout(self, timeout: Duration) -> Self {
        Self {
            idle_timeout: Some(timeout),
            ..self
        }
    }

    /// Fails the connection with [`WebSocketError::ConnectTimeout`] if the socket is
    /// not open and upgraded within `timeout`.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    /// Sets how long to wait for the peer after sending a close frame.
    pub fn with_close_grace_period(self, period: Duration) -> Self {
        Self {
            close_grace_period: period,
            ..self
        }
    }

    /// Sets the maximum payload size of an incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: size,
            ..self
        }
    }

    /// Sets the maximum size of a reassembled incoming message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: size,
            ..self
        }
    }

    /// Disables `TCP_NODELAY` on the client socket.
    pub fn with_delay(self) -> Self {
        Self {
            no_delay: false,
            ..self
        }
    }

    /// Checks the heartbeat/idle-timeout invariant.
    pub fn validate(&self) -> Result<()> {
        validate_liveness(self.heartbeat_interval, self.idle_timeout)
    }
}

/// Rejects zero durations and an idle timeout shorter than two heartbeat intervals.
pub(crate) fn validate_liveness(
    heartbeat_interval: Option<Duration>,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    if heartbeat_interval.is_some_and(|interval| interval.is_zero()) {
        return Err(WebSocketError::ZeroDuration("heartbeat interval"));
    }
    if idle_timeout.is_some_and(|timeout| timeout.is_zero()) {
        return Err(WebSocketError::ZeroDuration("idle timeout"));
    }

    match (heartbeat_interval, idle_timeout) {
        (Some(heartbeat_interval), Some(idle_timeout))
            if idle_timeout < heartbeat_interval.saturating_mul(2) =>
        {
            Err(WebSocketError::TimeoutTooShort {
                idle_timeout,
                heartbeat_interval,
            })
        }
        _ => Ok(()),
    }
}
