//! Connection state shared by the handle, the executor and the read loop.
use std::{
    collections::VecDeque,
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{sync::watch, time::Instant};

use super::{ConnectionState, Listener};
use crate::{close::CloseCode, options::Options, stream, WebSocketError};

/// Liveness bookkeeping, guarded by a single mutex.
#[derive(Debug)]
pub(crate) struct Liveness {
    /// Instant of the last successful read or write.
    pub(crate) last_io: Instant,
    pub(crate) heartbeat_interval: Option<Duration>,
    pub(crate) idle_timeout: Option<Duration>,
    /// Send instants of the pings not answered yet, oldest first.
    pub(crate) pending_pings: VecDeque<Instant>,
}

impl Liveness {
    /// Returns the timeout that expired at `now`, if any.
    pub(crate) fn check(&self, now: Instant) -> Option<WebSocketError> {
        if let (Some(interval), Some(oldest)) = (self.heartbeat_interval, self.pending_pings.front()) {
            if now >= *oldest + interval {
                log::error!(
                    "heartbeat timed out: oldest ping sent {:?} ago, interval {interval:?}",
                    now - *oldest
                );
                return Some(WebSocketError::HeartbeatTimeout);
            }
        }

        if let Some(timeout) = self.idle_timeout {
            if now >= self.last_io + timeout {
                log::error!(
                    "I/O timed out: last activity {:?} ago, timeout {timeout:?}",
                    now - self.last_io
                );
                return Some(WebSocketError::IdleTimeout);
            }
        }

        None
    }

    /// Changes the heartbeat interval.
    ///
    /// Pings left unanswered while the heartbeat was off are forgotten when it is
    /// turned back on, so they cannot expire the new heartbeat right away.
    pub(crate) fn set_heartbeat_interval(&mut self, interval: Option<Duration>) {
        if self.heartbeat_interval.is_none() && interval.is_some() {
            self.pending_pings.clear();
        }
        self.heartbeat_interval = interval;
    }

    /// Earliest instant at which [`check`](Self::check) can report a timeout.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        let heartbeat = self
            .heartbeat_interval
            .zip(self.pending_pings.front())
            .map(|(interval, oldest)| *oldest + interval);
        let idle = self.idle_timeout.map(|timeout| self.last_io + timeout);

        match (heartbeat, idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Why a connection ended without a completed close handshake.
///
/// Its display form is the reason reported to [`Listener::on_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectReason {
    /// The peer closed the stream.
    EndOfStream,
    /// The TLS layer failed.
    SecureTransport,
    /// Any other transport failure.
    Io,
    /// The peer violated the framing protocol.
    Protocol,
    /// The heartbeat or idle timeout expired.
    Timeout,
    /// The socket was torn down before the peer answered the close frame.
    Abandoned,
    /// Anything else.
    Other,
}

impl From<&WebSocketError> for DisconnectReason {
    fn from(err: &WebSocketError) -> Self {
        match err {
            WebSocketError::IoError(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Self::EndOfStream
            }
            WebSocketError::IoError(err) if stream::is_tls_error(err) => Self::SecureTransport,
            WebSocketError::IoError(_) => Self::Io,
            WebSocketError::HeartbeatTimeout | WebSocketError::IdleTimeout => Self::Timeout,
            err if err.is_protocol_error() => Self::Protocol,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EndOfStream => "EOF",
            Self::SecureTransport => "SSL error",
            Self::Io => "IO error",
            Self::Protocol => "protocol error",
            Self::Timeout => "timeout",
            Self::Abandoned => "close handshake not completed",
            Self::Other => "connection failed",
        })
    }
}

/// Shared connection state.
///
/// `close_sent` is only written by the executor and `close_received` only by the read
/// loop. The terminal `on_close` dispatch goes through an atomic swap so that it happens
/// at most once whichever task gets there first.
pub(crate) struct Session {
    listener: Box<dyn Listener>,
    handshaked: AtomicBool,
    close_sent: AtomicBool,
    close_received: AtomicBool,
    dispatched: AtomicBool,
    liveness: Mutex<Liveness>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(listener: Box<dyn Listener>, options: &Options) -> Self {
        Self {
            listener,
            handshaked: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
            close_received: AtomicBool::new(false),
            dispatched: AtomicBool::new(false),
            liveness: Mutex::new(Liveness {
                last_io: Instant::now(),
                heartbeat_interval: options.heartbeat_interval,
                idle_timeout: options.idle_timeout,
                pending_pings: VecDeque::new(),
            }),
            closed: watch::channel(false).0,
        }
    }

    pub(crate) fn listener(&self) -> &dyn Listener {
        self.listener.as_ref()
    }

    pub(crate) fn liveness(&self) -> MutexGuard<'_, Liveness> {
        // the guarded data stays consistent even if a listener panicked while it was held
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records I/O activity.
    pub(crate) fn touch(&self) {
        self.liveness().last_io = Instant::now();
    }

    /// Records a pong from the peer, answering the oldest outstanding ping.
    pub(crate) fn on_pong(&self) {
        if self.liveness().pending_pings.pop_front().is_none() {
            log::debug!("ignoring unsolicited pong");
        }
    }

    /// Marks the handshake as completed and notifies the listener.
    pub(crate) fn open(&self) {
        self.touch();
        self.handshaked.store(true, Ordering::Release);
        log::debug!("connection open");
        self.listener.on_open();
    }

    pub(crate) fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_close_sent(&self) {
        self.close_sent.store(true, Ordering::Release);
    }

    pub(crate) fn is_close_sent(&self) -> bool {
        self.close_sent.load(Ordering::Acquire)
    }

    /// Data frames, pings and pongs may only be sent on an open connection.
    pub(crate) fn can_send_frame(&self) -> bool {
        self.is_handshaked()
            && !self.close_sent.load(Ordering::Acquire)
            && !self.close_received.load(Ordering::Acquire)
    }

    /// A close frame may be sent once, after the handshake.
    pub(crate) fn can_send_close(&self) -> bool {
        self.is_handshaked() && !self.close_sent.load(Ordering::Acquire)
    }

    /// Handles a close frame from the peer.
    pub(crate) fn on_close_received(&self, code: CloseCode, reason: String) {
        self.close_received.store(true, Ordering::Release);
        log::debug!("close frame received: {} {reason:?}", u16::from(code));
        self.dispatch_close(code, reason);
    }

    /// Calls [`Listener::on_close`] unless it already fired or the connection never
    /// opened.
    pub(crate) fn dispatch_close(&self, code: CloseCode, reason: String) {
        if !self.is_handshaked() || self.dispatched.swap(true, Ordering::AcqRel) {
            return;
        }

        self.listener.on_close(code, reason);
    }

    /// Reports a fatal error.
    ///
    /// Before the handshake completed only [`Listener::on_error`] fires. Afterwards the
    /// error is followed by `on_close` with [`CloseCode::Abnormal`], and errors arriving
    /// once `on_close` fired are only logged.
    pub(crate) fn fail(&self, err: &WebSocketError) {
        if !self.is_handshaked() {
            log::error!("connecting: {err}");
            self.listener.on_error(err);
            return;
        }

        if self.dispatched.swap(true, Ordering::AcqRel) {
            log::debug!("ignoring error after close: {err}");
            return;
        }

        let reason = DisconnectReason::from(err);
        log::error!("connection failed ({reason}): {err}");

        self.listener.on_error(err);
        self.listener.on_close(CloseCode::Abnormal, reason.to_string());
    }

    pub(crate) fn set_closed(&self) {
        self.closed.send_replace(true);
        log::debug!("connection closed");
    }

    pub(crate) fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        if *self.closed.borrow() {
            ConnectionState::Closed
        } else if !self.is_handshaked() {
            ConnectionState::Connecting
        } else if self.close_sent.load(Ordering::Acquire)
            || self.close_received.load(Ordering::Acquire)
            || self.dispatched.load(Ordering::Acquire)
        {
            ConnectionState::Closing
        } else {
            ConnectionState::Open
        }
    }
}
