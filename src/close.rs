//! Close status codes, as defined in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).

/// Status code carried by a close frame or reported to [`Listener::on_close`](crate::Listener::on_close).
///
/// The first seven variants are the codes this client produces or interprets itself.
/// Any other code received from the peer is carried through unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away, such as a server going down.
    Away,
    /// 1002: an endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: an endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1004: reserved.
    Reserved,
    /// 1005: the close frame carried no status code.
    Status,
    /// 1006: the connection was closed without a close frame, used locally for
    /// transport failures, protocol errors and timeouts.
    Abnormal,
    /// 1007: a message payload was inconsistent with its type (e.g. invalid UTF-8).
    Invalid,
    /// 1008: a message violated the peer's policy.
    Policy,
    /// 1009: a message was too big to process.
    Size,
    /// 1010: the client expected an extension the server did not negotiate.
    Extension,
    /// 1011: the server hit an unexpected condition.
    Error,
    /// Any other code, e.g. an application code in the 4000-4999 range.
    Other(u16),
}

impl CloseCode {
    /// Returns `true` if the code may legally appear in a close frame on the wire.
    ///
    /// 1004, 1005 and 1006 are reserved for local reporting and must never be sent.
    pub fn is_sendable(&self) -> bool {
        match self {
            Self::Reserved | Self::Status | Self::Abnormal => false,
            Self::Other(code) => matches!(code, 1012..=1014 | 3000..=4999),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1004 => Self::Reserved,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            code => Self::Other(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Reserved => 1004,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Other(code) => code,
        }
    }
}
