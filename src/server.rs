//! TCP server for the chat page.
//!
//! Accepts one connection at a time, reads a single request, answers it
//! and closes the connection before accepting the next one. Clients that
//! connect meanwhile wait in the listen backlog.

use crate::config::Config;
use crate::form::FormFields;
use crate::protocol::{ParseError, ParseResult, Parser, RequestHead, Route};
use crate::render::Response;
use crate::storage::{MessageStore, StoreResult};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    handler: Handler,
    store: MessageStore,
}

impl Server {
    /// Bind the listening socket and create an empty message store
    pub async fn bind(config: Config) -> io::Result<Self> {
        let addr = tokio::net::lookup_host(&config.listen)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("No address found for '{}'", config.listen),
                )
            })?;

        let server = Server {
            listener: TcpListener::from_std(create_listener(addr, config.backlog)?)?,
            handler: Handler::new(&config),
            store: MessageStore::new(config.capacity),
        };
        info!(
            address = %server.local_addr()?,
            capacity = server.store.capacity(),
            "Server listening"
        );

        Ok(server)
    }

    /// Address the listener is bound to; resolves port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections one after another, forever
    pub async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(peer = %addr, "New client connected");

                    if let Err(e) = self.handler.handle(&mut stream, &mut self.store).await {
                        debug!(peer = %addr, error = %e, "Connection error");
                    }

                    debug!(peer = %addr, "Client disconnected");
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Get a reference to the store for testing
    #[cfg(test)]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }
}

/// Create a TCP listener with SO_REUSEADDR and the configured backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Per-connection failures
#[derive(Debug)]
pub enum ConnectionError {
    Io(io::Error),
    Parse(ParseError),
    /// Request head did not arrive in time
    HeaderTimeout(Duration),
    /// POST body did not arrive in time
    BodyTimeout(Duration),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::Parse(e) => write!(f, "{}", e),
            ConnectionError::HeaderTimeout(t) => {
                write!(f, "Request head not received within {:?}", t)
            }
            ConnectionError::BodyTimeout(t) => {
                write!(f, "Request body not received within {:?}", t)
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<ParseError> for ConnectionError {
    fn from(e: ParseError) -> Self {
        ConnectionError::Parse(e)
    }
}

/// Outcome of waiting for a POST body
enum Body {
    Complete(Bytes),
    /// No usable Content-Length, nothing read
    Skipped,
    /// Peer went away first
    Closed,
}

/// Request handler: one request in, one response out
pub struct Handler {
    parser: Parser,
    read_timeout: Duration,
    max_body_bytes: usize,
    title: String,
}

impl Handler {
    pub fn new(config: &Config) -> Self {
        Handler {
            parser: Parser::new(config.max_header_bytes),
            read_timeout: config.read_timeout,
            max_body_bytes: config.max_body_bytes,
            title: config.title.clone(),
        }
    }

    /// Handle a single client connection
    pub async fn handle<S>(
        &self,
        stream: &mut S,
        store: &mut MessageStore,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        let head = match tokio::time::timeout(self.read_timeout, self.read_head(stream, &mut buffer))
            .await
        {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(ConnectionError::Parse(e))) => {
                warn!(error = %e, "Dropping request");
                return Err(e.into());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectionError::HeaderTimeout(self.read_timeout)),
        };

        let route = head.route();
        debug!(method = %head.method, target = %head.target, ?route, "Dispatching request");

        let response = match route {
            Route::Post => {
                let body = match tokio::time::timeout(
                    self.read_timeout,
                    self.read_body(stream, &mut buffer, &head),
                )
                .await
                {
                    Ok(body) => body?,
                    Err(_) => {
                        warn!(timeout = ?self.read_timeout, "Timed out waiting for request body");
                        stream.write_all(&Response::request_timeout()).await?;
                        stream.shutdown().await?;
                        return Err(ConnectionError::BodyTimeout(self.read_timeout));
                    }
                };

                match body {
                    Body::Complete(body) => submit(&body, store),
                    Body::Skipped => {}
                    Body::Closed => {
                        trace!("Connection closed before body was complete");
                        return Ok(());
                    }
                }
                Response::ok()
            }
            Route::Messages => Response::messages(store),
            Route::Page => Response::page(store, &self.title),
        };

        stream.write_all(&response).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Read until the request head is complete. Leaves any bytes past the
    /// blank line in `buffer`. Returns `None` if the peer closed first.
    async fn read_head<S>(
        &self,
        stream: &mut S,
        buffer: &mut BytesMut,
    ) -> Result<Option<RequestHead>, ConnectionError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            match self.parser.parse(buffer) {
                ParseResult::Complete(head, consumed) => {
                    trace!(request = %String::from_utf8_lossy(&buffer[..consumed]), "Request head");
                    buffer.advance(consumed);
                    return Ok(Some(head));
                }
                ParseResult::Error(e) => return Err(e.into()),
                ParseResult::Incomplete => {
                    let n = stream.read_buf(buffer).await?;
                    if n == 0 {
                        trace!("Connection closed by client");
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Wait for `Content-Length` bytes of body
    async fn read_body<S>(
        &self,
        stream: &mut S,
        buffer: &mut BytesMut,
        head: &RequestHead,
    ) -> Result<Body, ConnectionError>
    where
        S: AsyncRead + Unpin,
    {
        let content_length = match head.content_length() {
            Some(len) => len,
            None => {
                debug!("POST without usable Content-Length, body ignored");
                return Ok(Body::Skipped);
            }
        };
        debug!(content_length, "Reading request body");

        if content_length > self.max_body_bytes {
            warn!(
                content_length,
                limit = self.max_body_bytes,
                "Request body too large, ignored"
            );
            return Ok(Body::Skipped);
        }

        while buffer.len() < content_length {
            let n = stream.read_buf(buffer).await?;
            if n == 0 {
                return Ok(Body::Closed);
            }
        }

        Ok(Body::Complete(buffer.split_to(content_length).freeze()))
    }
}

/// Store the chat line carried by a form body, if it has one
fn submit(body: &[u8], store: &mut MessageStore) {
    trace!(body = %String::from_utf8_lossy(body), "POST data");

    let form = FormFields::parse(body);
    if form.is_empty() {
        debug!("Empty POST body, ignored");
        return;
    }
    let (username, message) = match (form.get("username"), form.get("message")) {
        (Some(username), Some(message)) => (username, message),
        _ => {
            debug!(fields = form.len(), "POST without username and message, ignored");
            return;
        }
    };

    match store.post(username, message) {
        StoreResult::Evicted(oldest) => {
            trace!(evicted = %oldest, "Store full, dropped oldest message")
        }
        StoreResult::Stored => trace!(count = store.len(), "Message appended"),
        StoreResult::Rejected => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    fn handler() -> Handler {
        Handler::new(&Config::default())
    }

    fn contents(store: &MessageStore) -> Vec<&str> {
        store.iter().collect()
    }

    #[tokio::test]
    async fn test_messages_on_empty_store() {
        let mut stream = Builder::new()
            .read(b"GET /messages HTTP/1.1\r\nHost: chat\r\n\r\n")
            .write(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: text/plain; charset=UTF-8\r\n\
                  Content-Length: 0\r\n\
                  Connection: close\r\n\r\n",
            )
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
    }

    #[tokio::test]
    async fn test_post_stores_message() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 22\r\n\r\n")
            .read(b"username=Al&message=Hi")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert_eq!(contents(&store), vec!["Al: Hi"]);
    }

    #[tokio::test]
    async fn test_post_body_in_same_read_as_head() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 25\r\n\r\nusername=Bo&message=a%26b")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert_eq!(contents(&store), vec!["Bo: a&b"]);
    }

    #[tokio::test]
    async fn test_post_empty_message_rejected() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 20\r\n\r\nusername=Al&message=")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_post_encoded_spaces_stored() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 26\r\n\r\nusername=Al&message=%20%20")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert_eq!(contents(&store), vec!["Al:   "]);
    }

    #[tokio::test]
    async fn test_post_encoded_newline_stored_on_one_line() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 25\r\n\r\nusername=Al&message=a%0Ab")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert_eq!(contents(&store), vec!["Al: a b"]);
    }

    #[tokio::test]
    async fn test_garbage_request_gets_page() {
        let (mut client, mut server) = duplex(64 * 1024);
        client.write_all(b"\x01\x02 nonsense\r\n\r\n").await.unwrap();
        let mut store = MessageStore::new(10);

        handler().handle(&mut server, &mut store).await.unwrap();
        drop(server);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/html; charset=UTF-8"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_post_without_content_length_ignored() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\n\r\n")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_post_missing_fields_ignored() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nmessage=Hi")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_post_oversized_body_ignored() {
        let config = Config {
            max_body_bytes: 8,
            ..Config::default()
        };
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 22\r\n\r\n")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .build();
        let mut store = MessageStore::new(10);

        Handler::new(&config)
            .handle(&mut stream, &mut store)
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_peer_closes_mid_head() {
        let mut stream = Builder::new().read(b"GET /mess").build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_closes_mid_body() {
        let mut stream = Builder::new()
            .read(b"POST / HTTP/1.1\r\nContent-Length: 22\r\n\r\nusername=Al")
            .build();
        let mut store = MessageStore::new(10);

        handler().handle(&mut stream, &mut store).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let config = Config {
            max_header_bytes: 32,
            ..Config::default()
        };
        let mut stream = Builder::new().read(&[b'A'; 64]).build();
        let mut store = MessageStore::new(10);

        let result = Handler::new(&config).handle(&mut stream, &mut store).await;
        assert!(matches!(result, Err(ConnectionError::Parse(_))));
    }

    #[tokio::test]
    async fn test_body_timeout_returns_408() {
        let config = Config {
            read_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let (mut client, mut server) = duplex(1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 50\r\n\r\nusername=Al&message=Hi")
            .await
            .unwrap();
        let mut store = MessageStore::new(10);

        let result = Handler::new(&config).handle(&mut server, &mut store).await;
        assert!(matches!(result, Err(ConnectionError::BodyTimeout(_))));
        assert!(store.is_empty());

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(
            response,
            b"HTTP/1.1 408 Request Timeout\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_header_timeout() {
        let config = Config {
            read_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut store = MessageStore::new(10);

        let result = Handler::new(&config).handle(&mut server, &mut store).await;
        assert!(matches!(result, Err(ConnectionError::HeaderTimeout(_))));
    }

    #[tokio::test]
    async fn test_unknown_path_gets_page() {
        let (mut client, mut server) = duplex(64 * 1024);
        client
            .write_all(b"GET /notfound HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut store = MessageStore::new(10);
        store.post("Al", "Hi");

        handler().handle(&mut server, &mut store).await.unwrap();
        drop(server);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/html; charset=UTF-8"));
        assert!(response.contains("<div>Al: Hi</div>"));
    }

    async fn request(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn test_server_end_to_end() {
        let config = Config {
            listen: "127.0.0.1:0".to_string(),
            capacity: 2,
            ..Config::default()
        };
        let server = Server::bind(config).await.unwrap();
        assert!(server.store().is_empty());
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        for (user, text) in [("Al", "one"), ("Bo", "two"), ("Cy", "three+3")] {
            let body = format!("username={}&message={}", user, text);
            let raw = format!(
                "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let response = request(addr, raw.as_bytes()).await;
            assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        }

        let response = request(addr, b"GET /messages HTTP/1.1\r\n\r\n").await;
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, "Bo: two\nCy: three 3\n");

        let response = request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.contains("<div>Cy: three 3</div>"));
        assert!(!response.contains("Al: one"));

        task.abort();
    }
}
