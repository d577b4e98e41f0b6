//! Incremental frame codec.
//!
//! [`Decoder`] turns a byte stream into [`Message`]s, reassembling fragmented messages
//! on the way. [`Encoder`] turns messages into masked client frames. Both are pure byte
//! transformations and plug into [`tokio_util::codec::FramedRead`] and
//! [`tokio_util::codec::FramedWrite`].
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    close::CloseCode,
    frame::{Frame, Message, OpCode, MAX_CONTROL_PAYLOAD},
    mask::apply_mask,
    options::{MAX_PAYLOAD_READ, MAX_READ_BUFFER},
    WebSocketError,
};

/// Parse position within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for the FIN/RSV/opcode byte.
    Opcode,
    /// Waiting for the MASK/length byte.
    Length,
    /// Waiting for a 2 or 8 byte big-endian extended length.
    ExtendedLength(usize),
    /// Waiting for the 4 byte masking key.
    Mask,
    /// Waiting for `length` payload bytes.
    Payload,
}

/// Type of the fragmented message being reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reassembly {
    Text,
    Binary,
}

/// Incremental WebSocket frame decoder.
///
/// The decoder consumes bytes as they arrive, in chunks of any size, and yields a
/// [`Message`] once a complete text or binary message or a control frame has been read.
/// Continuation frames are buffered until the final fragment arrives.
///
/// ```rust
/// use wsclient::{codec::Decoder, Message};
///
/// let mut decoder = Decoder::default();
/// // an unmasked "Hi" text frame split in two chunks
/// assert!(decoder.feed(&[0x81, 0x02, b'H']).unwrap().is_empty());
/// assert_eq!(decoder.feed(b"i").unwrap(), vec![Message::Text("Hi".into())]);
/// ```
#[derive(Debug)]
pub struct Decoder {
    stage: Stage,
    fin: bool,
    opcode: OpCode,
    masked: bool,
    length: usize,
    mask: Option<[u8; 4]>,
    /// Mode of the fragmented message in progress, if any.
    reassembly: Option<Reassembly>,
    /// Payload accumulated from the fragments received so far.
    buffer: BytesMut,
    /// Bytes handed to [`Decoder::feed`] that do not form a complete frame yet.
    pending: BytesMut,
    max_payload_read: usize,
    max_read_buffer: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_READ, MAX_READ_BUFFER)
    }
}

impl Decoder {
    /// Creates a decoder limiting single frames to `max_payload_read` bytes and
    /// reassembled messages to `max_read_buffer` bytes.
    pub fn new(max_payload_read: usize, max_read_buffer: usize) -> Self {
        Self {
            stage: Stage::Opcode,
            fin: false,
            opcode: OpCode::Continuation,
            masked: false,
            length: 0,
            mask: None,
            reassembly: None,
            buffer: BytesMut::new(),
            pending: BytesMut::new(),
            max_payload_read,
            max_read_buffer,
        }
    }

    /// Feeds a chunk of bytes and returns every message it completes.
    ///
    /// Bytes belonging to an incomplete frame are kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>, WebSocketError> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let result = loop {
            match codec::Decoder::decode(self, &mut pending) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break Ok(messages),
                Err(err) => break Err(err),
            }
        };

        self.pending = pending;
        result
    }

    /// Returns `true` while a fragmented message is being reassembled.
    pub fn is_reassembling(&self) -> bool {
        self.reassembly.is_some()
    }

    fn parse_opcode(&mut self, byte: u8) -> Result<(), WebSocketError> {
        if byte & 0b0111_0000 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        self.fin = byte & 0b1000_0000 != 0;
        self.opcode = OpCode::try_from(byte & 0b0000_1111)?;
        self.mask = None;

        if self.opcode.is_control() && !self.fin {
            return Err(WebSocketError::ControlFrameFragmented);
        }

        self.stage = Stage::Length;
        Ok(())
    }

    fn parse_length(&mut self, byte: u8) -> Result<(), WebSocketError> {
        self.masked = byte & 0b1000_0000 != 0;

        match byte & 0x7F {
            126 => self.stage = Stage::ExtendedLength(2),
            127 => self.stage = Stage::ExtendedLength(8),
            length => self.set_length(usize::from(length))?,
        }

        Ok(())
    }

    fn parse_extended_length(&mut self, length: u64) -> Result<(), WebSocketError> {
        // a length must fit the platform's signed range
        let length = usize::try_from(length)
            .ok()
            .filter(|length| *length <= isize::MAX as usize)
            .ok_or(WebSocketError::FrameTooLarge)?;

        self.set_length(length)
    }

    fn set_length(&mut self, length: usize) -> Result<(), WebSocketError> {
        if self.opcode.is_control() && length > MAX_CONTROL_PAYLOAD {
            return Err(match self.opcode {
                OpCode::Ping => WebSocketError::PingFrameTooLarge,
                _ => WebSocketError::ControlFrameTooLarge,
            });
        }
        if length > self.max_payload_read {
            return Err(WebSocketError::FrameTooLarge);
        }

        self.length = length;
        self.stage = if self.masked {
            Stage::Mask
        } else {
            Stage::Payload
        };

        Ok(())
    }

    /// Dispatches an unmasked payload according to the opcode of its frame.
    fn on_payload(&mut self, payload: BytesMut) -> Result<Option<Message>, WebSocketError> {
        match self.opcode {
            OpCode::Continuation => {
                let mode = self
                    .reassembly
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;

                if self.buffer.len() + payload.len() > self.max_read_buffer {
                    return Err(WebSocketError::FrameTooLarge);
                }
                self.buffer.extend_from_slice(&payload);

                if !self.fin {
                    return Ok(None);
                }

                let message = std::mem::take(&mut self.buffer);
                self.reassembly = None;

                match mode {
                    Reassembly::Text => Ok(Some(Message::Text(utf8(&message)?))),
                    Reassembly::Binary => Ok(Some(Message::Binary(message.freeze()))),
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.reassembly.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if !self.fin {
                    self.reassembly = Some(if self.opcode == OpCode::Text {
                        Reassembly::Text
                    } else {
                        Reassembly::Binary
                    });
                    self.buffer.extend_from_slice(&payload);
                    return Ok(None);
                }

                if self.opcode == OpCode::Text {
                    Ok(Some(Message::Text(utf8(&payload)?)))
                } else {
                    Ok(Some(Message::Binary(payload.freeze())))
                }
            }
            OpCode::Close => {
                let code = match payload.get(..2) {
                    Some(&[hi, lo]) => CloseCode::from(u16::from_be_bytes([hi, lo])),
                    _ => CloseCode::Status,
                };
                let reason = match payload.get(2..) {
                    Some(rest) if !rest.is_empty() => utf8(rest)?,
                    _ => String::new(),
                };

                Ok(Some(Message::Close { code, reason }))
            }
            OpCode::Ping => Ok(Some(Message::Ping(payload.freeze()))),
            OpCode::Pong => Ok(Some(Message::Pong(payload.freeze()))),
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String, WebSocketError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| WebSocketError::InvalidUTF8)
}

impl codec::Decoder for Decoder {
    type Item = Message;
    type Error = WebSocketError;

    /// Advances through the frame stages as far as the bytes in `src` allow.
    ///
    /// # Returns
    /// - `Ok(Some(Message))` when a message is complete.
    /// - `Ok(None)` when more bytes are needed.
    /// - `Err(WebSocketError)` on a protocol violation. The decoder must not be used
    ///   afterwards.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.stage {
                Stage::Opcode => {
                    if !src.has_remaining() {
                        return Ok(None);
                    }
                    let byte = src.get_u8();
                    self.parse_opcode(byte)?;
                }
                Stage::Length => {
                    if !src.has_remaining() {
                        return Ok(None);
                    }
                    let byte = src.get_u8();
                    self.parse_length(byte)?;
                }
                Stage::ExtendedLength(size) => {
                    if src.remaining() < size {
                        return Ok(None);
                    }
                    let length = src.get_uint(size);
                    self.parse_extended_length(length)?;
                }
                Stage::Mask => {
                    if src.remaining() < 4 {
                        return Ok(None);
                    }
                    self.mask = Some(src.get_u32().to_be_bytes());
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    if src.remaining() < self.length {
                        src.reserve(self.length - src.remaining());
                        return Ok(None);
                    }

                    let mut payload = src.split_to(self.length);
                    if let Some(mask) = self.mask.take() {
                        apply_mask(&mut payload, mask);
                    }
                    self.stage = Stage::Opcode;

                    if let Some(message) = self.on_payload(payload)? {
                        return Ok(Some(message));
                    }
                }
            }
        }
    }
}

/// Encoder for client frames.
///
/// Every frame is masked with a fresh random key, as RFC 6455 requires from clients.
/// Control messages larger than 125 bytes are rejected before anything is written.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl codec::Encoder<Message> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        message.check_control_size()?;
        Frame::from(message).write_masked(dst);
        Ok(())
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.opcode.is_control() && frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(match frame.opcode {
                OpCode::Ping => WebSocketError::PingFrameTooLarge,
                _ => WebSocketError::ControlFrameTooLarge,
            });
        }

        frame.write_masked(dst);
        Ok(())
    }
}
