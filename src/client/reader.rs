//! Read loop: owns the inbound half of the stream.
use std::{io, sync::Arc};

use futures::StreamExt;
use tokio::{io::AsyncRead, sync::mpsc::UnboundedSender};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use super::{executor::Command, session::Session};
use crate::{close::CloseCode, codec::Decoder, frame::Message, WebSocketError};

/// Decodes messages until the stream ends, fails or `cancel` fires, then asks the
/// executor to tear the connection down.
pub(super) async fn run<R>(
    session: Arc<Session>,
    mut frames: FramedRead<R, Decoder>,
    commands: UnboundedSender<Command>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("read loop cancelled");
                break;
            }
            next = frames.next() => next,
        };

        match next {
            Some(Ok(message)) => on_message(&session, &commands, message),
            Some(Err(err)) => {
                session.fail(&err);
                break;
            }
            None => {
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed by peer");
                session.fail(&WebSocketError::IoError(eof));
                break;
            }
        }
    }

    // the executor may already be gone
    let _ = commands.send(Command::Teardown);
}

fn on_message(session: &Session, commands: &UnboundedSender<Command>, message: Message) {
    let enqueue = |command: Command| {
        if commands.send(command).is_err() {
            log::debug!("executor stopped, dropping reply");
        }
    };

    match message {
        Message::Text(text) => session.listener().on_text(text),
        Message::Binary(data) => session.listener().on_binary(data),
        Message::Ping(payload) => enqueue(Command::Send(Message::Pong(payload))),
        Message::Pong(_) => session.on_pong(),
        Message::Close { code, reason } => {
            session.on_close_received(code, reason.clone());

            // the peer answered our close, the handshake is complete
            if session.is_close_sent() {
                return;
            }

            // 1005 only exists locally, answer a close without status with a normal one
            let (code, reason) = if code.is_sendable() {
                (code, reason)
            } else {
                (CloseCode::Normal, String::new())
            };
            enqueue(Command::Close { code, reason });
        }
    }
}
