//! Public client handle.
//!
//! [`WebSocketClient`] is a cheap, cloneable handle to a connection driven by background
//! tasks. Every method returns immediately: sends and the close handshake are enqueued
//! and executed in order by the connection's write executor, and incoming messages and
//! lifecycle events are delivered to the [`Listener`] given at connect time.
mod executor;
mod handshake;
mod reader;
mod session;

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::{
    close::CloseCode,
    frame::Message,
    options::{validate_liveness, Options, NORMAL_CLOSE_REASON},
    stream::{self, BoxedTransport, Connect, Transport},
    Result, WebSocketError,
};
use executor::{Command, Executor};
use session::Session;

/// Type alias for HTTP requests used in the WebSocket handshake.
pub type HttpRequest = hyper::http::Request<()>;

/// Type alias for the builder of the handshake request.
///
/// Use it to add headers such as cookies or authorization to the Upgrade request.
pub type HttpRequestBuilder = hyper::http::request::Builder;

/// Receives the messages and lifecycle events of a connection.
///
/// Callbacks run on the connection's tasks: `on_text`, `on_binary` and `on_close` for
/// a peer close run on the read loop, the others may run on the write executor. They
/// should return quickly. Every method defaults to a no-op.
///
/// For a given connection:
/// - `on_open` fires once, when the handshake succeeded.
/// - `on_close` fires at most once, and only after `on_open`. A connection that never
///   opened only reports `on_error`.
/// - errors raised after `on_close` are logged but not reported.
pub trait Listener: Send + Sync + 'static {
    /// The handshake completed and the connection is open.
    fn on_open(&self) {}

    /// A complete text message arrived.
    fn on_text(&self, text: String) {
        let _ = text;
    }

    /// A complete binary message arrived.
    fn on_binary(&self, data: Bytes) {
        let _ = data;
    }

    /// The connection ended.
    ///
    /// `code` and `reason` are the peer's when it started the close handshake. A
    /// connection lost to an error or a timeout reports [`CloseCode::Abnormal`].
    fn on_close(&self, code: CloseCode, reason: String) {
        let _ = (code, reason);
    }

    /// A fatal error occurred: the handshake failed, the transport broke, the peer
    /// violated the protocol or a timeout expired.
    fn on_error(&self, err: &WebSocketError) {
        let _ = err;
    }
}

/// Lifecycle stage of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the socket or waiting for the handshake response.
    Connecting,
    /// The handshake completed; messages flow both ways.
    Open,
    /// A close frame was sent or received, or the connection failed, and the socket is
    /// not torn down yet.
    Closing,
    /// The socket is closed and the background tasks have stopped.
    Closed,
}

/// Handle to a WebSocket connection.
///
/// Clones share the same connection. Dropping every handle does not close it: call
/// [`close`](Self::close), or let the peer or a timeout end it.
///
/// # Example
/// ```no_run
/// use wsclient::{Listener, WebSocketClient};
///
/// struct Echo;
///
/// impl Listener for Echo {
///     fn on_text(&self, text: String) {
///         println!("{text}");
///     }
/// }
///
/// # async fn run() -> wsclient::Result<()> {
/// let client = WebSocketClient::connect("ws://localhost:9001".parse()?, Echo)?;
/// client.send("hello")?;
/// client.send(vec![0u8, 1, 2])?;
/// client.close()?;
/// client.closed().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebSocketClient {
    session: Arc<Session>,
    commands: UnboundedSender<Command>,
}

impl WebSocketClient {
    /// Creates a builder to configure a connection to `url`.
    pub fn builder(url: Url) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    /// Connects to `url` with default options.
    ///
    /// See [`ClientBuilder::connect`].
    pub fn connect(url: Url, listener: impl Listener) -> Result<Self> {
        Self::builder(url).connect(listener)
    }

    /// Enqueues a message.
    ///
    /// Messages are written in the order they were enqueued. Messages enqueued while
    /// connecting are written once the connection opens. Text, binary, ping and pong
    /// messages are dropped, with a warning in the log, if the connection is closing by
    /// the time they reach the executor. A close message starts the close handshake like
    /// [`close_with`](Self::close_with).
    ///
    /// # Errors
    /// - [`WebSocketError::PingFrameTooLarge`] or [`WebSocketError::ControlFrameTooLarge`]
    ///   for control messages over 125 bytes.
    /// - [`WebSocketError::ConnectionClosed`] once the connection is closed.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        message.check_control_size()?;

        match message {
            Message::Close { code, reason } => self.close_with(code, reason),
            message => self.enqueue(Command::Send(message)),
        }
    }

    /// Enqueues a ping. The pong that answers it clears the oldest outstanding ping of
    /// the heartbeat check.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(Message::Ping(payload.into()))
    }

    /// Starts the close handshake with [`CloseCode::Normal`] and
    /// [`NORMAL_CLOSE_REASON`](crate::options::NORMAL_CLOSE_REASON).
    ///
    /// The socket is torn down when the peer closes it, or at the latest after
    /// [`Options::close_grace_period`].
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseCode::Normal, NORMAL_CLOSE_REASON)
    }

    /// Starts the close handshake with the given code and reason.
    ///
    /// Only the first close frame is sent; later calls are ignored.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidCloseCode`] for 1004, 1005, 1006 and other codes that
    ///   may not appear on the wire.
    /// - [`WebSocketError::ControlFrameTooLarge`] if `reason` is longer than 123 bytes.
    pub fn close_with(&self, code: CloseCode, reason: impl Into<String>) -> Result<()> {
        if !code.is_sendable() {
            return Err(WebSocketError::InvalidCloseCode(code.into()));
        }

        let reason = reason.into();
        Message::close(code, reason.as_str()).check_control_size()?;

        self.enqueue(Command::Close { code, reason })
    }

    /// Changes the heartbeat interval. `None` stops the heartbeat.
    ///
    /// # Errors
    /// [`WebSocketError::TimeoutTooShort`] if the current idle timeout is shorter than
    /// twice `interval`. The configuration is left unchanged.
    pub fn set_heartbeat_interval(&self, interval: Option<Duration>) -> Result<()> {
        {
            let mut liveness = self.session.liveness();
            validate_liveness(interval, liveness.idle_timeout)?;
            liveness.set_heartbeat_interval(interval);
        }

        self.enqueue(Command::RescheduleHeartbeat)
    }

    /// Changes the idle timeout. `None` disables it.
    ///
    /// # Errors
    /// [`WebSocketError::TimeoutTooShort`] if `timeout` is shorter than twice the
    /// current heartbeat interval. The configuration is left unchanged.
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        {
            let mut liveness = self.session.liveness();
            validate_liveness(liveness.heartbeat_interval, timeout)?;
            liveness.idle_timeout = timeout;
        }

        self.enqueue(Command::CheckTimeout)
    }

    /// Current lifecycle stage of the connection.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Resolves once the connection is closed and its tasks have stopped.
    pub async fn closed(&self) {
        let mut closed = self.session.subscribe_closed();
        // the session owns the sender, so the channel cannot close under us
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        if self.session.state() == ConnectionState::Closed {
            return Err(WebSocketError::ConnectionClosed);
        }

        self.commands
            .send(command)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }
}

/// Configures a connection before opening it.
///
/// ```no_run
/// use std::time::Duration;
/// use wsclient::{Listener, Options, WebSocketClient};
///
/// struct Quiet;
/// impl Listener for Quiet {}
///
/// # async fn run() -> wsclient::Result<()> {
/// let client = WebSocketClient::builder("wss://example.com/feed".parse()?)
///     .with_options(
///         Options::default()
///             .with_heartbeat_interval(Duration::from_secs(20))
///             .with_idle_timeout(Duration::from_secs(60)),
///     )
///     .with_header("Cookie", "session=abc")
///     .connect(Quiet)?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    url: Url,
    options: Options,
    request: HttpRequestBuilder,
    connector: Option<TlsConnector>,
    tcp_address: Option<SocketAddr>,
}

impl ClientBuilder {
    fn new(url: Url) -> Self {
        Self {
            url,
            options: Options::default(),
            request: HttpRequest::builder(),
            connector: None,
            tcp_address: None,
        }
    }

    /// Sets the connection options.
    pub fn with_options(self, options: Options) -> Self {
        Self { options, ..self }
    }

    /// Adds a header to the handshake request.
    ///
    /// Invalid names or values are reported by [`connect`](Self::connect) through
    /// [`Listener::on_error`] as [`WebSocketError::HttpRequest`].
    pub fn with_header<K, V>(self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: Into<hyper::http::Error>,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: Into<hyper::http::Error>,
    {
        Self {
            request: self.request.header(key, value),
            ..self
        }
    }

    /// Uses `request` as the base of the handshake request, replacing the headers
    /// added so far.
    ///
    /// `Host` and `Origin` headers already set on `request` are kept; the WebSocket
    /// headers, the method and the URI are always set by the client.
    pub fn with_request(self, request: HttpRequestBuilder) -> Self {
        Self { request, ..self }
    }

    /// Sets the TLS connector used for `wss` URLs.
    ///
    /// Defaults to a connector trusting the webpki root certificates.
    pub fn with_connector(self, connector: TlsConnector) -> Self {
        Self {
            connector: Some(connector),
            ..self
        }
    }

    /// Connects to `address` instead of resolving the URL's host.
    ///
    /// The URL is still used for the handshake and for TLS server name verification.
    pub fn with_tcp_address(self, address: SocketAddr) -> Self {
        Self {
            tcp_address: Some(address),
            ..self
        }
    }

    /// Starts connecting and returns the handle right away.
    ///
    /// The connection opens in the background; [`Listener::on_open`] fires once the
    /// handshake succeeded. Failures to connect are reported through
    /// [`Listener::on_error`].
    ///
    /// # Errors
    /// Rejects invalid options ([`WebSocketError::TimeoutTooShort`]), URLs whose
    /// scheme is not `ws` or `wss` and URLs without a host.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn connect(self, listener: impl Listener) -> Result<WebSocketClient> {
        let connect = Connect::Tcp {
            tcp_address: self.tcp_address,
            connector: self.connector.clone(),
            no_delay: self.options.no_delay,
        };

        self.spawn(connect, listener)
    }

    /// Like [`connect`](Self::connect), but runs the connection over the stream
    /// returned by `stream` instead of opening a socket.
    ///
    /// Useful to tunnel through a proxy, or to test against an in-memory peer.
    pub fn connect_with_stream<F, S>(self, stream: F, listener: impl Listener) -> Result<WebSocketClient>
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
        S: Transport,
    {
        let connect = Connect::Stream(Box::pin(async move {
            let stream: BoxedTransport = Box::new(stream.await?);
            Ok(stream)
        }));

        self.spawn(connect, listener)
    }

    fn spawn(self, connect: Connect, listener: impl Listener) -> Result<WebSocketClient> {
        self.options.validate()?;
        stream::is_secure(&self.url)?;
        if self.url.host_str().is_none() {
            return Err(WebSocketError::MissingHost);
        }

        let session = Arc::new(Session::new(Box::new(listener), &self.options));
        let (sender, commands) = mpsc::unbounded_channel();

        let executor = Executor::new(
            Arc::clone(&session),
            self.options,
            sender.clone(),
            commands,
        );
        tokio::spawn(executor.run(self.url, connect, self.request));

        Ok(WebSocketClient {
            session,
            commands: sender,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Decoder,
        frame::{Frame, OpCode, MAX_HEAD_SIZE},
        HEARTBEAT_PAYLOAD,
    };
    use bytes::BytesMut;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
        sync::mpsc::UnboundedReceiver,
        time::timeout,
    };
    use tokio_util::codec::Decoder as _;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, PartialEq)]
    enum Event {
        Open,
        Text(String),
        Binary(Bytes),
        Close(CloseCode, String),
        Error(String),
    }

    struct Events(mpsc::UnboundedSender<Event>);

    impl Listener for Events {
        fn on_open(&self) {
            let _ = self.0.send(Event::Open);
        }

        fn on_text(&self, text: String) {
            let _ = self.0.send(Event::Text(text));
        }

        fn on_binary(&self, data: Bytes) {
            let _ = self.0.send(Event::Binary(data));
        }

        fn on_close(&self, code: CloseCode, reason: String) {
            let _ = self.0.send(Event::Close(code, reason));
        }

        fn on_error(&self, err: &WebSocketError) {
            let _ = self.0.send(Event::Error(err.to_string()));
        }
    }

    /// Server side of an in-memory connection.
    struct Peer {
        io: DuplexStream,
        buf: BytesMut,
        decoder: Decoder,
    }

    impl Peer {
        /// Reads the Upgrade request and returns it with the raw bytes read so far.
        async fn read_request(io: &mut DuplexStream) -> String {
            let mut request = Vec::new();
            while !request.ends_with(b"\r\n\r\n") {
                let mut byte = [0u8; 1];
                if io.read(&mut byte).await.unwrap() == 0 {
                    break;
                }
                request.push(byte[0]);
            }
            String::from_utf8(request).unwrap()
        }

        async fn accept(mut io: DuplexStream) -> Self {
            let request = Self::read_request(&mut io).await;
            let key = request
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("sec-websocket-key")
                        .then(|| value.trim().to_owned())
                })
                .unwrap();

            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\r\n",
                handshake::accept_key(&key)
            );
            io.write_all(response.as_bytes()).await.unwrap();

            Self {
                io,
                buf: BytesMut::new(),
                decoder: Decoder::default(),
            }
        }

        /// Next message from the client, `None` once it closed its side.
        async fn next(&mut self) -> Option<Message> {
            timeout(WAIT, async {
                loop {
                    if let Some(message) = self.decoder.decode(&mut self.buf).unwrap() {
                        return Some(message);
                    }
                    if self.io.read_buf(&mut self.buf).await.unwrap() == 0 {
                        return None;
                    }
                }
            })
            .await
            .unwrap()
        }

        async fn send(&mut self, message: Message) {
            let frame = Frame::from(message);
            self.send_raw(&frame).await;
        }

        /// Writes an unmasked frame, as servers do.
        async fn send_raw(&mut self, frame: &Frame) {
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);
            self.io.write_all(&head[..size]).await.unwrap();
            self.io.write_all(&frame.payload).await.unwrap();
        }
    }

    fn connect(options: Options) -> (WebSocketClient, DuplexStream, UnboundedReceiver<Event>) {
        let (local, remote) = tokio::io::duplex(1 << 20);
        let (tx, rx) = mpsc::unbounded_channel();

        let client = WebSocketClient::builder("ws://localhost/socket".parse().unwrap())
            .with_options(options)
            .connect_with_stream(std::future::ready(Ok(local)), Events(tx))
            .unwrap();

        (client, remote, rx)
    }

    async fn open(options: Options) -> (WebSocketClient, Peer, UnboundedReceiver<Event>) {
        let (client, remote, mut events) = connect(options);
        let peer = Peer::accept(remote).await;
        assert_eq!(next_event(&mut events).await, Event::Open);
        (client, peer, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<Event>) -> Event {
        timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    async fn wait_closed(client: &WebSocketClient) {
        timeout(WAIT, client.closed()).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_request_headers() {
        let (local, mut remote) = tokio::io::duplex(1 << 16);
        let (tx, _events) = mpsc::unbounded_channel();

        let _client = WebSocketClient::builder("ws://localhost:9001/chat?id=7".parse().unwrap())
            .with_header("Authorization", "Bearer token")
            .connect_with_stream(std::future::ready(Ok(local)), Events(tx))
            .unwrap();

        let request = Peer::read_request(&mut remote).await.to_ascii_lowercase();
        assert!(request.starts_with("get /chat?id=7 http/1.1\r\n"));
        assert!(request.contains("host: localhost:9001\r\n"));
        assert!(request.contains("origin: http://localhost\r\n"));
        assert!(request.contains("upgrade: websocket\r\n"));
        assert!(request.contains("connection: upgrade\r\n"));
        assert!(request.contains("sec-websocket-version: 13\r\n"));
        assert!(request.contains("authorization: bearer token\r\n"));
    }

    #[tokio::test]
    async fn test_sends_in_order() {
        let (client, mut peer, _events) = open(Options::default()).await;

        client.send("first").unwrap();
        client.send("second").unwrap();
        client.send(vec![1u8, 2, 3]).unwrap();
        client.send_ping("are you there").unwrap();

        assert_eq!(peer.next().await, Some(Message::Text("first".into())));
        assert_eq!(peer.next().await, Some(Message::Text("second".into())));
        assert_eq!(peer.next().await, Some(Message::Binary(Bytes::from_static(&[1, 2, 3]))));
        assert_eq!(peer.next().await, Some(Message::Ping(Bytes::from_static(b"are you there"))));
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_sends_before_open_are_delivered() {
        let (client, remote, mut events) = connect(Options::default());
        client.send("early").unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);

        let mut peer = Peer::accept(remote).await;
        assert_eq!(next_event(&mut events).await, Event::Open);
        assert_eq!(peer.next().await, Some(Message::Text("early".into())));
    }

    #[tokio::test]
    async fn test_receives_messages_and_answers_pings() {
        let (_client, mut peer, mut events) = open(Options::default()).await;

        peer.send(Message::Text("hello".into())).await;
        peer.send(Message::Binary(Bytes::from_static(b"\x00\x01"))).await;
        peer.send(Message::Ping(Bytes::from_static(b"p"))).await;

        assert_eq!(next_event(&mut events).await, Event::Text("hello".into()));
        assert_eq!(
            next_event(&mut events).await,
            Event::Binary(Bytes::from_static(b"\x00\x01"))
        );
        assert_eq!(peer.next().await, Some(Message::Pong(Bytes::from_static(b"p"))));
    }

    #[tokio::test]
    async fn test_fragmented_message_from_peer() {
        let (_client, mut peer, mut events) = open(Options::default()).await;

        peer.send_raw(&Frame::first_fragment(OpCode::Text, "frag")).await;
        peer.send_raw(&Frame::continuation(false, "men")).await;
        peer.send_raw(&Frame::continuation(true, "ted")).await;

        assert_eq!(next_event(&mut events).await, Event::Text("fragmented".into()));
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let (client, mut peer, mut events) = open(Options::default()).await;

        peer.send(Message::close(CloseCode::Away, "restarting")).await;

        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Away, "restarting".into())
        );
        assert_eq!(peer.next().await, Some(Message::close(CloseCode::Away, "restarting")));

        // no application frame once the peer closed
        client.send("too late").unwrap();

        drop(peer);
        wait_closed(&client).await;

        // the end of stream after the close handshake is not an error
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_without_status_is_answered_normally() {
        let (client, mut peer, mut events) = open(Options::default()).await;

        peer.send_raw(&Frame::new(true, OpCode::Close, None, BytesMut::new()))
            .await;

        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Status, String::new())
        );
        assert_eq!(peer.next().await, Some(Message::close(CloseCode::Normal, "")));

        drop(peer);
        wait_closed(&client).await;
    }

    #[tokio::test]
    async fn test_close_handshake() {
        let options = Options::default().with_close_grace_period(Duration::from_millis(500));
        let (client, mut peer, mut events) = open(options).await;

        client.close().unwrap();
        client.send("after close").unwrap();
        client.close_with(CloseCode::Away, "twice").unwrap();

        assert_eq!(
            peer.next().await,
            Some(Message::close(CloseCode::Normal, NORMAL_CLOSE_REASON))
        );
        assert_eq!(client.state(), ConnectionState::Closing);

        peer.send(Message::close(CloseCode::Normal, "")).await;
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Normal, String::new())
        );

        // the client shuts its side down after the grace period, without writing anything else
        assert_eq!(peer.next().await, None);
        wait_closed(&client).await;

        assert!(events.try_recv().is_err());
        assert!(matches!(
            client.send("closed"),
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_unanswered_close_times_out() {
        let options = Options::default().with_close_grace_period(Duration::from_millis(50));
        let (client, mut peer, mut events) = open(options).await;

        client.close().unwrap();
        assert_eq!(
            peer.next().await,
            Some(Message::close(CloseCode::Normal, NORMAL_CLOSE_REASON))
        );
        assert_eq!(peer.next().await, None);

        wait_closed(&client).await;
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Abnormal, "close handshake not completed".into())
        );
    }

    #[tokio::test]
    async fn test_peer_disconnect() {
        let (client, peer, mut events) = open(Options::default()).await;

        drop(peer);

        assert!(matches!(next_event(&mut events).await, Event::Error(_)));
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Abnormal, "EOF".into())
        );
        wait_closed(&client).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_protocol_error() {
        let (client, mut peer, mut events) = open(Options::default()).await;

        // RSV1 set
        peer.io.write_all(&[0xC1, 0x00]).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::ReservedBitsNotZero.to_string())
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Abnormal, "protocol error".into())
        );
        assert_eq!(peer.next().await, None);
        wait_closed(&client).await;
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let options = Options::default().with_heartbeat_interval(Duration::from_millis(100));
        let (client, mut peer, mut events) = open(options).await;

        let heartbeat = Message::Ping(Bytes::from_static(HEARTBEAT_PAYLOAD.as_bytes()));

        // answered pings keep the connection alive
        for _ in 0..3 {
            assert_eq!(peer.next().await, Some(heartbeat.clone()));
            peer.send(Message::Pong(Bytes::from_static(HEARTBEAT_PAYLOAD.as_bytes())))
                .await;
        }
        assert_eq!(client.state(), ConnectionState::Open);

        // an unanswered one drops it one interval later
        assert_eq!(peer.next().await, Some(heartbeat));
        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::HeartbeatTimeout.to_string())
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Abnormal, "timeout".into())
        );
        assert_eq!(peer.next().await, None);
        wait_closed(&client).await;
    }

    #[tokio::test]
    async fn test_heartbeat_can_be_stopped() {
        let options = Options::default().with_heartbeat_interval(Duration::from_millis(50));
        let (client, mut peer, _events) = open(options).await;

        assert!(matches!(peer.next().await, Some(Message::Ping(_))));
        peer.send(Message::Pong(Bytes::new())).await;

        client.set_heartbeat_interval(None).unwrap();
        client.send("marker").unwrap();

        // at most one more ping can race the reschedule
        let mut next = peer.next().await;
        if matches!(next, Some(Message::Ping(_))) {
            next = peer.next().await;
        }
        assert_eq!(next, Some(Message::Text("marker".into())));

        tokio::time::sleep(Duration::from_millis(200)).await;
        client.send("still open").unwrap();
        assert_eq!(peer.next().await, Some(Message::Text("still open".into())));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let options = Options::default().with_idle_timeout(Duration::from_millis(100));
        let (client, mut peer, mut events) = open(options).await;

        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::IdleTimeout.to_string())
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::Close(CloseCode::Abnormal, "timeout".into())
        );
        assert_eq!(peer.next().await, None);
        wait_closed(&client).await;
    }

    #[tokio::test]
    async fn test_liveness_configuration() {
        let (tx, _events) = mpsc::unbounded_channel();
        let invalid = Options::default()
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_idle_timeout(Duration::from_secs(15));

        let result = WebSocketClient::builder("ws://localhost".parse().unwrap())
            .with_options(invalid)
            .connect(Events(tx));
        assert!(matches!(result, Err(WebSocketError::TimeoutTooShort { .. })));

        let (tx, _events) = mpsc::unbounded_channel();
        let client = WebSocketClient::builder("ws://localhost".parse().unwrap())
            .with_options(Options::default().with_heartbeat_interval(Duration::from_secs(10)))
            .connect_with_stream(std::future::pending::<io::Result<DuplexStream>>(), Events(tx))
            .unwrap();

        assert!(matches!(
            client.set_idle_timeout(Some(Duration::from_secs(15))),
            Err(WebSocketError::TimeoutTooShort { .. })
        ));
        client.set_idle_timeout(Some(Duration::from_secs(20))).unwrap();
        assert!(matches!(
            client.set_heartbeat_interval(Some(Duration::from_secs(11))),
            Err(WebSocketError::TimeoutTooShort { .. })
        ));
        client.set_heartbeat_interval(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_enabling_heartbeat_ignores_unanswered_user_ping() {
        let (client, mut peer, _events) = open(Options::default()).await;

        client.send_ping("user").unwrap();
        assert_eq!(peer.next().await, Some(Message::Ping(Bytes::from_static(b"user"))));
        tokio::time::sleep(Duration::from_millis(300)).await;

        client
            .set_heartbeat_interval(Some(Duration::from_millis(200)))
            .unwrap();
        assert_eq!(
            peer.next().await,
            Some(Message::Ping(Bytes::from_static(HEARTBEAT_PAYLOAD.as_bytes())))
        );
        peer.send(Message::Pong(Bytes::from_static(HEARTBEAT_PAYLOAD.as_bytes())))
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_zero_liveness_durations_are_rejected() {
        let (tx, _events) = mpsc::unbounded_channel();
        let result = WebSocketClient::builder("ws://localhost".parse().unwrap())
            .with_options(Options::default().with_heartbeat_interval(Duration::ZERO))
            .connect(Events(tx));
        assert!(matches!(result, Err(WebSocketError::ZeroDuration(_))));

        let (tx, _events) = mpsc::unbounded_channel();
        let result = WebSocketClient::builder("ws://localhost".parse().unwrap())
            .with_options(Options::default().with_idle_timeout(Duration::ZERO))
            .connect(Events(tx));
        assert!(matches!(result, Err(WebSocketError::ZeroDuration(_))));

        let (client, mut peer, _events) = open(Options::default()).await;
        assert!(matches!(
            client.set_heartbeat_interval(Some(Duration::ZERO)),
            Err(WebSocketError::ZeroDuration("heartbeat interval"))
        ));
        assert!(matches!(
            client.set_idle_timeout(Some(Duration::ZERO)),
            Err(WebSocketError::ZeroDuration("idle timeout"))
        ));

        // the rejected settings left the connection untouched
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.send("alive").unwrap();
        assert_eq!(peer.next().await, Some(Message::Text("alive".into())));
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (client, mut peer, _events) = open(Options::default()).await;

        assert!(matches!(
            client.send_ping(vec![0u8; 126]),
            Err(WebSocketError::PingFrameTooLarge)
        ));
        assert!(matches!(
            client.close_with(CloseCode::Status, ""),
            Err(WebSocketError::InvalidCloseCode(1005))
        ));
        assert!(matches!(
            client.close_with(CloseCode::Normal, "x".repeat(124)),
            Err(WebSocketError::ControlFrameTooLarge)
        ));

        // nothing was enqueued
        client.send("ok").unwrap();
        assert_eq!(peer.next().await, Some(Message::Text("ok".into())));
    }

    #[tokio::test]
    async fn test_rejected_urls() {
        let (tx, _events) = mpsc::unbounded_channel();
        let result = WebSocketClient::connect("http://localhost".parse().unwrap(), Events(tx));
        assert!(matches!(result, Err(WebSocketError::InvalidHttpScheme)));
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (client, mut remote, mut events) = connect(Options::default());

        Peer::read_request(&mut remote).await;
        remote
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::InvalidStatusCode(404).to_string())
        );
        wait_closed(&client).await;

        // a connection that never opened does not report a close
        assert!(events.try_recv().is_err());
        assert!(matches!(client.send("x"), Err(WebSocketError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_no_response() {
        let (client, mut remote, mut events) = connect(Options::default());

        Peer::read_request(&mut remote).await;
        drop(remote);

        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::NoResponse.to_string())
        );
        wait_closed(&client).await;
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let client = WebSocketClient::builder("ws://localhost".parse().unwrap())
            .with_options(Options::default().with_connect_timeout(Duration::from_millis(50)))
            .connect_with_stream(std::future::pending::<io::Result<DuplexStream>>(), Events(tx))
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Event::Error(WebSocketError::ConnectTimeout.to_string())
        );
        wait_closed(&client).await;
    }
}
