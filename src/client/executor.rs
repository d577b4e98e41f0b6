//! Write executor: the single task that owns the outbound half of the stream.
//!
//! Every write goes through [`Command`]s processed one at a time, so frames reach the
//! wire in the order they were enqueued and never interleave. The heartbeat, the
//! timeout watchdog and the close grace period are deadlines of the same loop.
use std::{future::pending, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::SinkExt;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::{
    io::{ReadHalf, WriteHalf},
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use url::Url;

use super::{
    handshake::handshake,
    reader,
    session::{DisconnectReason, Session},
    ConnectionState, HttpRequestBuilder,
};
use crate::{
    close::CloseCode,
    codec::{Decoder, Encoder},
    frame::Message,
    options::{Options, HEARTBEAT_PAYLOAD},
    stream::{Connect, IoTracked},
    Result, WebSocketError,
};

type Stream = TokioIo<Upgraded>;
type Sink = FramedWrite<WriteHalf<Stream>, Encoder>;

/// Work items for the executor.
#[derive(Debug)]
pub(crate) enum Command {
    /// Writes a data frame, a ping or a pong.
    Send(Message),
    /// Starts the close handshake, or answers the peer's close frame.
    Close { code: CloseCode, reason: String },
    /// Restarts the heartbeat after its interval changed.
    RescheduleHeartbeat,
    /// Re-evaluates the timeouts after the idle timeout changed.
    CheckTimeout,
    /// Closes the socket and stops the executor.
    Teardown,
}

pub(crate) struct Executor {
    session: Arc<Session>,
    options: Options,
    commands: UnboundedReceiver<Command>,
    /// Handed to the read loop so that it can enqueue replies.
    sender: UnboundedSender<Command>,
    sink: Option<Sink>,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    heartbeat_at: Option<Instant>,
    teardown_at: Option<Instant>,
    failed: bool,
}

impl Executor {
    pub(crate) fn new(
        session: Arc<Session>,
        options: Options,
        sender: UnboundedSender<Command>,
        commands: UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            session,
            options,
            commands,
            sender,
            sink: None,
            reader: None,
            cancel: CancellationToken::new(),
            heartbeat_at: None,
            teardown_at: None,
            failed: false,
        }
    }

    /// Connects, then processes commands and deadlines until teardown.
    pub(crate) async fn run(mut self, url: Url, connect: Connect, request: HttpRequestBuilder) {
        let stream = match open(&url, connect, request, self.options.connect_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                self.session.fail(&err);
                self.session.set_closed();
                return;
            }
        };

        self.start(stream);

        while !self.failed {
            let watchdog = self.watchdog();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Teardown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                _ = deadline(self.teardown_at) => {
                    log::debug!("close grace period expired");
                    break;
                }
                _ = deadline(self.heartbeat_at) => self.heartbeat().await,
                _ = deadline(watchdog) => {
                    self.timed_out();
                }
            }
        }

        self.teardown().await;
    }

    /// Fires `on_open`, spawns the read loop and starts the heartbeat.
    fn start(&mut self, stream: Stream) {
        let (read_half, write_half) = tokio::io::split(stream);
        self.sink = Some(FramedWrite::new(write_half, Encoder));

        self.session.open();

        let reader = self.spawn_reader(read_half);
        self.reader = Some(reader);

        self.reschedule_heartbeat();
    }

    fn spawn_reader(&self, read_half: ReadHalf<Stream>) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let tracked = IoTracked::new(read_half, move || session.touch());

        let decoder = Decoder::new(self.options.max_payload_read, self.options.max_read_buffer);
        let frames = FramedRead::new(tracked, decoder);

        tokio::spawn(reader::run(
            Arc::clone(&self.session),
            frames,
            self.sender.clone(),
            self.cancel.clone(),
        ))
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => self.send(message).await,
            Command::Close { code, reason } => self.close(code, reason).await,
            Command::RescheduleHeartbeat => self.reschedule_heartbeat(),
            Command::CheckTimeout => {
                self.timed_out();
            }
            // handled by the loop
            Command::Teardown => {}
        }
    }

    async fn send(&mut self, message: Message) {
        if self.timed_out() {
            return;
        }

        if !self.session.can_send_frame() {
            log::warn!(
                "dropping {:?} frame: connection is {:?}",
                message.opcode(),
                self.session.state()
            );
            return;
        }

        if matches!(message, Message::Ping(_)) {
            self.session
                .liveness()
                .pending_pings
                .push_back(Instant::now());
        }

        self.write(message).await;
    }

    async fn close(&mut self, code: CloseCode, reason: String) {
        if self.timed_out() {
            return;
        }

        if !self.session.can_send_close() {
            // a close was already sent: this is a second close or the echo of the
            // peer's reply
            log::debug!("close frame already sent, dropping {}", u16::from(code));
            return;
        }

        log::debug!("sending close frame: {} {reason:?}", u16::from(code));
        self.session.mark_close_sent();
        self.write(Message::Close { code, reason }).await;

        self.heartbeat_at = None;
        self.teardown_at = Some(Instant::now() + self.options.close_grace_period);
    }

    fn reschedule_heartbeat(&mut self) {
        let enabled = self.session.liveness().heartbeat_interval.is_some();

        // the first ping goes out right away
        self.heartbeat_at = (enabled && self.session.can_send_frame()).then(Instant::now);
    }

    async fn heartbeat(&mut self) {
        self.heartbeat_at = None;

        let interval = self.session.liveness().heartbeat_interval;
        let Some(interval) = interval else {
            return;
        };
        if !self.session.can_send_frame() {
            return;
        }

        self.send(Message::Ping(Bytes::from_static(HEARTBEAT_PAYLOAD.as_bytes())))
            .await;

        if !self.failed {
            self.heartbeat_at = Some(Instant::now() + interval);
        }
    }

    /// Next instant at which a timeout may expire.
    fn watchdog(&self) -> Option<Instant> {
        match self.session.state() {
            ConnectionState::Open => self.session.liveness().deadline(),
            _ => None,
        }
    }

    /// Fails the connection if a timeout expired. Only an open connection can time out.
    fn timed_out(&mut self) -> bool {
        if self.session.state() != ConnectionState::Open {
            return false;
        }

        let expired = self.session.liveness().check(Instant::now());
        match expired {
            Some(err) => {
                self.fail(err);
                true
            }
            None => false,
        }
    }

    async fn write(&mut self, message: Message) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        match sink.send(message).await {
            Ok(()) => self.session.touch(),
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: WebSocketError) {
        self.session.fail(&err);
        self.failed = true;
    }

    /// Stops the read loop, closes the socket and reports the end of the connection.
    async fn teardown(&mut self) {
        self.cancel.cancel();
        self.heartbeat_at = None;
        self.teardown_at = None;

        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = SinkExt::<Message>::close(&mut sink).await {
                log::debug!("shutting down write half: {err}");
            }
        }

        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                log::error!("read loop: {err}");
            }
        }

        self.session
            .dispatch_close(CloseCode::Abnormal, DisconnectReason::Abandoned.to_string());
        self.session.set_closed();
    }
}

/// Opens the transport and performs the handshake within `connect_timeout`.
async fn open(
    url: &Url,
    connect: Connect,
    request: HttpRequestBuilder,
    connect_timeout: Option<Duration>,
) -> Result<Stream> {
    let upgrade = async {
        let io = connect.open(url).await?;
        handshake(url, io, request).await
    };

    match connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, upgrade)
            .await
            .map_err(|_| WebSocketError::ConnectTimeout)?,
        None => upgrade.await,
    }
}

/// Resolves at `at`, or never when there is no deadline.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
