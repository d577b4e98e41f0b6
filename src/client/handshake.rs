//! HTTP/1.1 Upgrade exchange opening a WebSocket connection.
use base64::prelude::*;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{body::Incoming, header, upgrade::Upgraded, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use url::Url;

use super::HttpRequestBuilder;
use crate::{stream::BoxedTransport, Result, WebSocketError};

/// GUID appended to the client key to derive `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Sends the Upgrade request over `io` and returns the upgraded stream.
///
/// Headers already present in `builder` take precedence over the generated `Host`
/// and `Origin` headers.
pub(super) async fn handshake(
    url: &Url,
    io: BoxedTransport,
    builder: HttpRequestBuilder,
) -> Result<TokioIo<Upgraded>> {
    let key = generate_key();
    let request = build_request(url, builder, &key)?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

    tokio::spawn(async move {
        if let Err(err) = conn.with_upgrades().await {
            log::error!("upgrading connection: {err:?}");
        }
    });

    let mut response = sender.send_request(request).await.map_err(|err| {
        if err.is_incomplete_message() {
            WebSocketError::NoResponse
        } else {
            WebSocketError::HTTPError(err)
        }
    })?;

    verify(&response, &key)?;

    let upgraded = hyper::upgrade::on(&mut response).await?;
    Ok(TokioIo::new(upgraded))
}

fn build_request(
    url: &Url,
    mut builder: HttpRequestBuilder,
    key: &str,
) -> Result<hyper::Request<Empty<Bytes>>> {
    let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
    let has_header = |builder: &HttpRequestBuilder, name: header::HeaderName| {
        builder
            .headers_ref()
            .is_some_and(|headers| headers.contains_key(name))
    };

    if !has_header(&builder, header::HOST) {
        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        builder = builder.header(header::HOST, host_header);
    }

    if !has_header(&builder, header::ORIGIN) {
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        builder = builder.header(header::ORIGIN, format!("{scheme}://{host}"));
    }

    let target_url = &url[url::Position::BeforePath..];

    let request = builder
        .method("GET")
        .uri(target_url)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key)
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(Empty::<Bytes>::new())?;

    Ok(request)
}

fn verify(response: &Response<Incoming>, key: &str) -> Result<()> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(
            response.status().as_u16(),
        ));
    }

    verify_headers(response.headers(), key)
}

fn verify_headers(headers: &header::HeaderMap, key: &str) -> Result<()> {
    let header_is = |name: header::HeaderName, expected: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|h| h.eq_ignore_ascii_case(expected))
    };

    if !header_is(header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !header_is(header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let accepted = headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .is_some_and(|h| h.as_bytes() == accept_key(key).as_bytes());
    if !accepted {
        return Err(WebSocketError::InvalidAcceptKey);
    }

    Ok(())
}

fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Derives the `Sec-WebSocket-Accept` value the server must answer `key` with.
pub(crate) fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}
