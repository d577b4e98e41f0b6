//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2)
//! and the logical [`Message`] type the client exchanges with the application.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! A [`Frame`] is a single wire unit. A [`Message`] is what the application sends and
//! receives: a complete text or binary message (possibly reassembled from several
//! frames) or a control message. The encoder turns each message into exactly one frame.
//!
//! ```rust
//! use wsclient::{CloseCode, Message};
//!
//! let text = Message::from("Hello, WebSocket!");
//! let binary = Message::from(vec![1u8, 2, 3]);
//! let ping = Message::Ping("are you there".into());
//! let close = Message::close(CloseCode::Normal, "bye");
//! ```
use bytes::{BufMut, Bytes, BytesMut};

use crate::{close::CloseCode, WebSocketError};

/// Largest payload a control frame (close, ping, pong) may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Size of the longest possible client frame header: 2 bytes, 8 bytes of extended
/// length and a 4 byte mask key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// WebSocket operation code that determines the meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A logical WebSocket message.
///
/// Outgoing messages are consumed by [`Encoder`](crate::codec::Encoder); incoming ones
/// are produced by [`Decoder`](crate::codec::Decoder) once all fragments have arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A complete UTF-8 text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// A ping; the peer must answer with a pong carrying the same payload.
    Ping(Bytes),
    /// A pong, either answering a ping or unsolicited.
    Pong(Bytes),
    /// A close frame. A received close frame without a status code is reported
    /// with [`CloseCode::Status`] and an empty reason.
    Close { code: CloseCode, reason: String },
}

impl Message {
    /// Creates a close message.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }

    /// Returns the opcode of the frame this message is encoded into.
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
            Self::Ping(_) => OpCode::Ping,
            Self::Pong(_) => OpCode::Pong,
            Self::Close { .. } => OpCode::Close,
        }
    }

    /// Length of the encoded payload, including the status code of a close frame.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close { reason, .. } => 2 + reason.len(),
        }
    }

    /// Ensures a control message fits in a single control frame.
    pub(crate) fn check_control_size(&self) -> Result<(), WebSocketError> {
        if !self.opcode().is_control() || self.payload_len() <= MAX_CONTROL_PAYLOAD {
            return Ok(());
        }

        match self {
            Self::Ping(_) => Err(WebSocketError::PingFrameTooLarge),
            _ => Err(WebSocketError::ControlFrameTooLarge),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data.into())
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(data))
    }
}

/// A single WebSocket frame.
///
/// Most users never build frames directly: [`Message`] covers everything the client
/// sends. Frames are useful to produce fragmented or hand-crafted input, for example
/// when testing a decoder.
///
/// # Fields
/// - `fin`: set on the last frame of a message.
/// - `opcode`: frame type.
/// - `mask`: 4 byte masking key. Client frames are always masked; when encoding a frame
///   without a key, a random one is generated.
/// - `payload`: unmasked payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key, if already chosen.
    pub mask: Option<[u8; 4]>,
    /// The unmasked payload.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Creates a non-final text or binary frame starting a fragmented message.
    pub fn first_fragment(opcode: OpCode, payload: impl AsRef<[u8]>) -> Self {
        Self::new(false, opcode, None, BytesMut::from(payload.as_ref()))
    }

    /// Creates a continuation frame.
    pub fn continuation(fin: bool, payload: impl AsRef<[u8]>) -> Self {
        Self::new(
            fin,
            OpCode::Continuation,
            None,
            BytesMut::from(payload.as_ref()),
        )
    }

    /// Formats the frame header into `head` and returns its size.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= u16::MAX as usize {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        match self.mask {
            Some(mask) => {
                head[1] |= 0x80;
                head[size..size + 4].copy_from_slice(&mask);
                size + 4
            }
            None => size,
        }
    }

    /// Writes the masked wire representation of the frame into `dst`.
    ///
    /// A fresh random key is drawn when the frame has none. Masking only exists to
    /// keep intermediaries from interpreting client payloads, so a non-cryptographic
    /// source is enough.
    pub(crate) fn write_masked(mut self, dst: &mut BytesMut) {
        let mask = *self.mask.get_or_insert_with(rand::random);

        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = self.fmt_head(&mut head);

        crate::mask::apply_mask(&mut self.payload, mask);

        dst.reserve(size + self.payload.len());
        dst.put_slice(&head[..size]);
        dst.put_slice(&self.payload);
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        let opcode = message.opcode();
        let payload = match message {
            Message::Text(text) => BytesMut::from(text.as_bytes()),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => {
                BytesMut::from(&data[..])
            }
            Message::Close { code, reason } => {
                let mut payload = BytesMut::with_capacity(2 + reason.len());
                payload.put_u16(code.into());
                payload.put_slice(reason.as_bytes());
                payload
            }
        };

        Frame::new(true, opcode, None, payload)
    }
}
