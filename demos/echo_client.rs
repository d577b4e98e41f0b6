//! Connects to an echo server, sends a few messages and closes the connection.
//!
//! ```sh
//! cargo run --example echo_client -- wss://echo.websocket.org
//! ```
use std::time::Duration;

use wsclient::{CloseCode, Listener, Options, WebSocketClient, WebSocketError};

struct Logger;

impl Listener for Logger {
    fn on_open(&self) {
        log::info!("connected");
    }

    fn on_text(&self, text: String) {
        log::info!("<< {text}");
    }

    fn on_close(&self, code: CloseCode, reason: String) {
        log::info!("closed: {} {reason}", u16::from(code));
    }

    fn on_error(&self, err: &WebSocketError) {
        log::error!("{err}");
    }
}

#[tokio::main]
async fn main() -> wsclient::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let client = WebSocketClient::builder(url.parse()?)
        .with_options(
            Options::default()
                .with_heartbeat_interval(Duration::from_secs(5))
                .with_idle_timeout(Duration::from_secs(15))
                .with_connect_timeout(Duration::from_secs(10)),
        )
        .connect(Logger)?;

    for i in 0..3 {
        client.send(format!("message {i}"))?;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    client.close()?;
    client.closed().await;
    Ok(())
}
