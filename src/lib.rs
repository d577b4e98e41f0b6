//! # wsclient
//! Client side of the WebSocket protocol (RFC 6455, hybi-13) with a callback driven session.
//!
//! A [`WebSocketClient`] performs the HTTP Upgrade handshake, frames and unframes text and
//! binary messages, and manages the connection lifecycle: the graceful close handshake,
//! a liveness heartbeat and idle-timeout detection. Incoming messages and lifecycle events
//! are delivered to an application supplied [`Listener`].
//!
//! # Architecture
//!
//! Every connection runs two tasks on the tokio runtime:
//!
//! - the **write executor**, a single serialized task that opens the socket, performs the
//!   handshake and is the only writer of the outbound stream. Sends, the close handshake,
//!   heartbeat ticks and teardown are all commands processed in order by this task, so
//!   they never interleave.
//! - the **read loop**, which drives the incremental [`codec::Decoder`] over the inbound
//!   half of the stream and reports to the session.
//!
//! The public API never touches the socket: [`WebSocketClient::send`],
//! [`WebSocketClient::close`] and friends only enqueue commands, so the handle can be
//! cloned and used from any thread.
//!
//! # Client Example
//! ```no_run
//! use std::time::Duration;
//! use wsclient::{CloseCode, Listener, Options, WebSocketClient};
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn on_open(&self) {
//!         println!("connected");
//!     }
//!
//!     fn on_text(&self, text: String) {
//!         println!("<< {text}");
//!     }
//!
//!     fn on_close(&self, code: CloseCode, reason: String) {
//!         println!("closed: {} {reason}", u16::from(code));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> wsclient::Result<()> {
//!     let options = Options::default()
//!         .with_heartbeat_interval(Duration::from_secs(10))
//!         .with_idle_timeout(Duration::from_secs(30));
//!
//!     let client = WebSocketClient::builder("wss://echo.websocket.org".parse()?)
//!         .with_options(options)
//!         .with_header("Authorization", "Bearer token")
//!         .connect(Printer)?;
//!
//!     client.send("hello")?;
//!     client.close()?;
//!     client.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//! Lifecycle transitions, rejected sends and failures are reported through the [`log`]
//! facade. Install any logger implementation to see them.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod options;
mod stream;

pub mod close;
pub mod codec;
pub mod frame;
mod mask;

use std::time::Duration;

use thiserror::Error;

pub use client::{
    ClientBuilder, ConnectionState, HttpRequest, HttpRequestBuilder, Listener, WebSocketClient,
};
pub use close::CloseCode;
pub use frame::{Frame, Message, OpCode};
pub use options::{
    Options, CLOSE_GRACE_PERIOD, HEARTBEAT_PAYLOAD, MAX_PAYLOAD_READ, MAX_READ_BUFFER,
};
pub use stream::Transport;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors are broadly categorized into:
///
/// - Protocol errors (malformed frames, illegal fragmentation, oversized control frames)
/// - Handshake errors (unexpected HTTP response to the Upgrade request)
/// - Liveness errors (heartbeat or idle timeout)
/// - Configuration errors (rejected synchronously by the call that introduced them)
/// - I/O and HTTP level errors
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Occurs when receiving a new text or binary fragment before the previous
    /// fragmented message was completed.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Indicates that a text message or close frame reason contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Indicates that reserved bits in the frame header are set.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Occurs when a control frame (ping, pong, or close) is received with the FIN bit
    /// not set.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Indicates that a ping frame exceeds the maximum allowed size of 125 bytes.
    #[error("Ping frame too large")]
    PingFrameTooLarge,

    /// Indicates that a close or pong frame exceeds the maximum allowed size of 125 bytes,
    /// either received from the peer or about to be sent.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// Occurs when a frame's payload length is out of range or exceeds the configured
    /// maximum, or when a fragmented message outgrows the read buffer.
    #[error("Frame too large")]
    FrameTooLarge,

    /// Indicates receipt of a frame with an opcode outside the RFC 6455 set.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Returned when the handshake response status is not 101 Switching Protocols.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header of the handshake response is missing or is not "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header of the handshake response is missing or is not "upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The "Sec-WebSocket-Accept" header does not match the key sent in the request.
    #[error("Invalid Sec-WebSocket-Accept header")]
    InvalidAcceptKey,

    /// The stream ended before the server sent a status line.
    #[error("Received no reply from server")]
    NoResponse,

    /// Returned when connecting to a URL whose scheme is not "ws" or "wss".
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,

    /// Opening the socket and completing the handshake took longer than the
    /// configured connect timeout.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// The oldest outstanding heartbeat ping has not been answered within one interval.
    #[error("Heartbeat timed out")]
    HeartbeatTimeout,

    /// No byte was read or written for longer than the idle timeout.
    #[error("I/O timed out")]
    IdleTimeout,

    /// The idle timeout must be at least twice the heartbeat interval, since a heartbeat
    /// round trip must not itself trip the idle timeout.
    #[error("idle timeout {idle_timeout:?} must be at least twice the heartbeat interval {heartbeat_interval:?}")]
    TimeoutTooShort {
        idle_timeout: Duration,
        heartbeat_interval: Duration,
    },

    /// A heartbeat interval or idle timeout of zero. Use `None` to disable either one.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The close code is reserved for local reporting and cannot be sent in a close frame.
    #[error("Close code {0} cannot be sent")]
    InvalidCloseCode(u16),

    /// Returned when attempting to use a connection whose executor has shut down.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps I/O errors from the underlying transport.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper connection driving the handshake.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),

    /// Wraps errors from building the handshake request, such as invalid extra headers.
    #[error(transparent)]
    HttpRequest(#[from] hyper::http::Error),
}

impl WebSocketError {
    /// Returns `true` for malformed-frame errors that must fail the connection.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFragment
                | Self::InvalidUTF8
                | Self::InvalidContinuationFrame
                | Self::ReservedBitsNotZero
                | Self::ControlFrameFragmented
                | Self::PingFrameTooLarge
                | Self::ControlFrameTooLarge
                | Self::FrameTooLarge
                | Self::InvalidOpCode(_)
        )
    }

    /// Returns `true` for errors raised while exchanging the HTTP Upgrade.
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatusCode(_)
                | Self::InvalidUpgradeHeader
                | Self::InvalidConnectionHeader
                | Self::InvalidAcceptKey
                | Self::NoResponse
                | Self::HTTPError(_)
                | Self::HttpRequest(_)
        )
    }
}
