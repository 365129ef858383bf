//! HTTP/1.1 request head parser.
//!
//! Tokenizing is done by `httparse`; on top of it this module:
//! - Copies method, target, and headers out of the read buffer
//! - Looks headers up case-insensitively
//! - Classifies requests into the three routes the server answers
//!
//! No chunked encoding, keep-alive, or pipelining.

/// Default upper bound on the request head
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Most headers accepted in one request
const MAX_HEADERS: usize = 32;

/// What the server does with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Chat submission; the body carries the form
    Post,
    /// Plain-text dump of the chat log for the polling script
    Messages,
    /// The chat page. Fallback for everything else
    Page,
}

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Value of the first header named `name` (ASCII case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared body length, if present and a valid non-negative integer
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// Classify the request.
    ///
    /// Any POST is a submission, GET on a target starting with
    /// `/messages` is a log fetch, and everything else gets the page.
    pub fn route(&self) -> Route {
        match self.method.as_str() {
            "POST" => Route::Post,
            "GET" if self.target.starts_with("/messages") => Route::Messages,
            _ => Route::Page,
        }
    }
}

/// Request parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No blank line within the first `limit` bytes
    HeaderTooLarge { limit: usize },
    /// More than `limit` header lines
    TooManyHeaders { limit: usize },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::HeaderTooLarge { limit } => {
                write!(f, "Request head exceeds {} bytes", limit)
            }
            ParseError::TooManyHeaders { limit } => {
                write!(f, "Request has more than {} headers", limit)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of parsing a request head
#[derive(Debug)]
pub enum ParseResult {
    /// Head parsed; `usize` is the number of bytes it occupied,
    /// including the terminating blank line
    Complete(RequestHead, usize),
    /// Need more data
    Incomplete,
    /// Parse error
    Error(ParseError),
}

/// Parser for HTTP request heads
pub struct Parser {
    max_header_bytes: usize,
}

impl Parser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self { max_header_bytes }
    }

    /// Parse a request head from the start of `buffer`.
    ///
    /// A request line or header that is not valid HTTP does not fail the
    /// request: the whole buffer is taken as the head and it is answered
    /// with the page.
    pub fn parse(&self, buffer: &[u8]) -> ParseResult {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buffer) {
            Ok(httparse::Status::Complete(head_len)) => {
                if head_len > self.max_header_bytes {
                    return self.too_large();
                }

                let head = RequestHead {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or_default().to_string(),
                    headers: req
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).trim().to_string(),
                            )
                        })
                        .collect(),
                };
                ParseResult::Complete(head, head_len)
            }
            Ok(httparse::Status::Partial) if buffer.len() > self.max_header_bytes => {
                self.too_large()
            }
            Ok(httparse::Status::Partial) => ParseResult::Incomplete,
            Err(httparse::Error::TooManyHeaders) => {
                ParseResult::Error(ParseError::TooManyHeaders { limit: MAX_HEADERS })
            }
            Err(_) if buffer.len() > self.max_header_bytes => self.too_large(),
            Err(_) => ParseResult::Complete(
                RequestHead {
                    method: String::new(),
                    target: String::new(),
                    headers: Vec::new(),
                },
                buffer.len(),
            ),
        }
    }

    fn too_large(&self) -> ParseResult {
        ParseResult::Error(ParseError::HeaderTooLarge {
            limit: self.max_header_bytes,
        })
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}
