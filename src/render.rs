//! HTTP response generation.
//!
//! Every response is a complete HTTP/1.1 message with `Connection: close`
//! and an explicit `Content-Length`; the server writes it and hangs up.

use crate::storage::MessageStore;
use bytes::BytesMut;
use std::fmt::Write;

/// Default `<title>` of the chat page
pub const DEFAULT_TITLE: &str = "Chatroom";

const PAGE_STYLE: &str = "\
body { background-color: black; color: white; font-family: Arial, sans-serif; display: flex; flex-direction: column; justify-content: flex-end; height: 100vh; margin: 0; overflow: hidden; }
#message { width: 100%; height: 100px; }
#chatLog { flex: 1; overflow-y: auto; padding: 10px; box-sizing: border-box; }
";

const PAGE_SCRIPT: &str = r#"
document.addEventListener('DOMContentLoaded', function() {
  var username = localStorage.getItem('username');
  if (!username) {
    username = prompt('Enter your username:') || 'User';
    localStorage.setItem('username', username);
  }
  document.getElementById('username').value = username;
  var color = localStorage.getItem('color');
  if (!color) {
    color = randomColor();
    localStorage.setItem('color', color);
  }
  highlightOwnLines(username, color);
});

function sendMessage() {
  var messageInput = document.getElementById('message');
  if (messageInput.value.trim() === '') return;
  var username = document.getElementById('username').value;
  var xhr = new XMLHttpRequest();
  xhr.open('POST', '/', true);
  xhr.setRequestHeader('Content-Type', 'application/x-www-form-urlencoded; charset=UTF-8');
  xhr.send('username=' + encodeURIComponent(username) + '&message=' + encodeURIComponent(messageInput.value));
  messageInput.value = '';
}

function fetchMessages() {
  var xhr = new XMLHttpRequest();
  xhr.open('GET', '/messages', true);
  xhr.onreadystatechange = function() {
    if (xhr.readyState == 4 && xhr.status == 200) {
      var chatLog = document.getElementById('chatLog');
      chatLog.innerHTML = escapeHtml(xhr.responseText).replace(/\n/g, '<br>');
      chatLog.scrollTop = chatLog.scrollHeight;
      highlightOwnLines(localStorage.getItem('username'), localStorage.getItem('color'));
    }
  };
  xhr.send();
}

document.addEventListener('keypress', function(e) {
  if (e.key === 'Enter') {
    e.preventDefault();
    sendMessage();
  }
});

function randomColor() {
  var letters = '0123456789ABCDEF';
  var color = '#';
  for (var i = 0; i < 6; i++) {
    color += letters[Math.floor(Math.random() * 16)];
  }
  return color;
}

function escapeHtml(text) {
  return text.replace(/&/g, '&amp;').replace(/</g, '&lt;').replace(/>/g, '&gt;')
    .replace(/"/g, '&quot;').replace(/'/g, '&#39;');
}

function highlightOwnLines(username, color) {
  if (!username) return;
  var chatLog = document.getElementById('chatLog');
  var name = escapeHtml(username);
  var pattern = name.replace(/[.*+?^${}()|[\]\\]/g, '\\$&');
  var regex = new RegExp(pattern + ':', 'g');
  chatLog.innerHTML = chatLog.innerHTML.replace(regex, '<span style="color:' + escapeHtml(color) + '">' + name + ':</span>');
}

setInterval(fetchMessages, 1000);
"#;

/// Response generator
pub struct Response;

impl Response {
    /// Full chat page with the current log inlined
    pub fn page(store: &MessageStore, title: &str) -> BytesMut {
        let mut body = String::with_capacity(PAGE_STYLE.len() + PAGE_SCRIPT.len() + 1024);

        body.push_str("<!DOCTYPE HTML>\n<html>\n<head><meta charset=\"UTF-8\">\n");
        let _ = writeln!(body, "<title>{}</title>", escape_html(title));
        let _ = write!(body, "<style>\n{}</style>\n", PAGE_STYLE);
        let _ = write!(body, "<script>{}</script>\n", PAGE_SCRIPT);
        body.push_str("</head>\n<body>\n<div id='chatLog'>\n");
        for message in store.iter() {
            let _ = writeln!(body, "<div>{}</div>", escape_html(message));
        }
        body.push_str("</div>\n");
        body.push_str("<input type='hidden' id='username'><br>\n");
        body.push_str("<textarea id='message' placeholder='Enter your message here...'></textarea><br>\n");
        body.push_str("<button onclick='sendMessage()'>Send</button>\n");
        body.push_str("</body>\n</html>\n");

        Self::build("200 OK", Some("text/html; charset=UTF-8"), body.as_bytes())
    }

    /// Chat log as plain text, one message per line
    pub fn messages(store: &MessageStore) -> BytesMut {
        let mut body = String::new();
        for message in store.iter() {
            body.push_str(message);
            body.push('\n');
        }

        Self::build("200 OK", Some("text/plain; charset=UTF-8"), body.as_bytes())
    }

    /// Empty acknowledgement for a chat submission
    pub fn ok() -> BytesMut {
        Self::build("200 OK", None, b"")
    }

    /// The body did not arrive in time
    pub fn request_timeout() -> BytesMut {
        Self::build("408 Request Timeout", None, b"")
    }

    fn build(status: &str, content_type: Option<&str>, body: &[u8]) -> BytesMut {
        let mut head = format!("HTTP/1.1 {}\r\n", status);
        if let Some(content_type) = content_type {
            let _ = write!(head, "Content-Type: {}\r\n", content_type);
        }
        let _ = write!(
            head,
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );

        let mut response = BytesMut::with_capacity(head.len() + body.len());
        response.extend_from_slice(head.as_bytes());
        response.extend_from_slice(body);
        response
    }
}

/// Escape text for inclusion in HTML element content
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
