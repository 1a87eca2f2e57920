//! STOMP 1.2 frame codec.
//!
//! The server speaks STOMP over WebSocket text messages. A frame is
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! where `^@` is a NUL octet. A bare EOL between frames is a heart-beat.
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) on every
//! frame except CONNECT and CONNECTED.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// The only protocol version we negotiate.
pub const STOMP_VERSION: &str = "1.2";

// ── Command ──────────────────────────────────────────────────────────

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client commands
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    // Server commands
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let cmd = match raw {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(cmd)
    }

    /// CONNECT and CONNECTED frames carry headers verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// A single STOMP frame.
///
/// Headers keep their wire order; when a header repeats, the first
/// occurrence is authoritative.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl fmt::Debug for Frame {
    // Never print credentials that travel in CONNECT headers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Frame")
            .field("command", &self.command)
            .field("headers", &headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header by exact name (first occurrence wins).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // ── Builders for the client commands we use ──────────────────────

    /// CONNECT frame carrying the bearer credential.
    ///
    /// `heart_beat` is `(outgoing_ms, incoming_ms)` from the client's
    /// point of view.
    pub fn connect(host: &str, token: &SecretString, heart_beat: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
            .with_header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            )
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// SEND frame with a JSON body.
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    // ── Header helpers ───────────────────────────────────────────────

    /// Parse the `heart-beat` header as `(cx, cy)`.
    pub fn heart_beat(&self) -> Option<(u64, u64)> {
        let raw = self.header("heart-beat")?;
        let (a, b) = raw.split_once(',')?;
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    }

    /// The `message` header of an ERROR frame, falling back to the body.
    pub fn error_message(&self) -> String {
        self.header("message")
            .map(str::to_owned)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.body.trim().to_owned())
    }

    // ── Encoding ─────────────────────────────────────────────────────

    /// Serialize this frame, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    // ── Decoding ─────────────────────────────────────────────────────

    /// Parse every frame contained in one WebSocket text message.
    ///
    /// Heart-beat EOLs before, between, and after frames are skipped.
    pub fn parse_all(raw: &str) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();
        let mut rest = raw;
        loop {
            rest = rest.trim_start_matches(['\n', '\r']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, consumed) = parse_one(rest)?;
            frames.push(frame);
            rest = rest.get(consumed..).unwrap_or_default();
        }
    }
}

/// Parse a single frame from the front of `raw`; returns the frame and
/// the number of bytes consumed (including the NUL terminator).
fn parse_one(raw: &str) -> Result<(Frame, usize), Error> {
    let mut pos = 0usize;

    let command_line = next_line(raw, &mut pos)
        .ok_or_else(|| Error::Frame("missing command line".into()))?;
    let command = Command::parse(command_line)
        .ok_or_else(|| Error::Frame(format!("unknown command `{command_line}`")))?;

    let mut headers = Vec::new();
    loop {
        let line = next_line(raw, &mut pos)
            .ok_or_else(|| Error::Frame("unterminated header block".into()))?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Frame(format!("header without colon: `{line}`")))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| Error::Frame(format!("invalid content-length `{v}`")))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => pos
            .checked_add(len)
            .filter(|end| *end < raw.len())
            .ok_or_else(|| Error::Frame(format!("content-length {len} exceeds frame")))?,
        None => raw[pos..]
            .find('\0')
            .map(|i| pos + i)
            .ok_or_else(|| Error::Frame("missing NUL terminator".into()))?,
    };

    let body = raw
        .get(pos..body_end)
        .ok_or_else(|| Error::Frame("body shorter than content-length".into()))?
        .to_owned();

    if raw.as_bytes().get(body_end) != Some(&0) {
        return Err(Error::Frame("missing NUL terminator".into()));
    }

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

/// Read up to the next LF, stripping an optional CR; advances `pos`.
fn next_line<'a>(raw: &'a str, pos: &mut usize) -> Option<&'a str> {
    let rest = raw.get(*pos..)?;
    let idx = rest.find('\n')?;
    *pos += idx + 1;
    Some(rest[..idx].strip_suffix('\r').unwrap_or(&rest[..idx]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(Error::Frame(format!("undefined escape `\\{other}`")));
            }
            None => return Err(Error::Frame("dangling escape".into())),
        }
    }
    Ok(out)
}

/// Negotiate effective heart-beat intervals per STOMP 1.2.
///
/// Returns `(outgoing_ms, incoming_ms)` from the client's side; `0`
/// disables that direction.
pub fn negotiate_heart_beat(client: (u64, u64), server: (u64, u64)) -> (u64, u64) {
    let (cx, cy) = client;
    let (sx, sy) = server;
    let outgoing = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
    let incoming = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
    (outgoing, incoming)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_subscribe_frame() {
        let frame = Frame::subscribe("sub-0", "/user/queue/requests");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-0\ndestination:/user/queue/requests\nack:auto\n\n\0"
        );
    }

    #[test]
    fn connect_frame_does_not_escape_headers() {
        let token = SecretString::from("abc:def".to_string());
        let frame = Frame::connect("ws://localhost:8080/ws", &token, (10_000, 10_000));
        let encoded = frame.encode();
        assert!(encoded.starts_with("CONNECT\naccept-version:1.2\nhost:ws://localhost:8080/ws\n"));
        assert!(encoded.contains("Authorization:Bearer abc:def\n"));
        assert!(encoded.contains("heart-beat:10000,10000\n"));
    }

    #[test]
    fn debug_output_redacts_authorization() {
        let token = SecretString::from("super-secret".to_string());
        let frame = Frame::connect("h", &token, (0, 0));
        let dbg = format!("{frame:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn parse_message_frame() {
        let raw = "MESSAGE\ndestination:/user/queue/messages\nsubscription:sub-1\nmessage-id:42\n\n{\"id\":\"m1\"}\0";
        let frames = Frame::parse_all(raw).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-1"));
        assert_eq!(frame.header("destination"), Some("/user/queue/messages"));
        assert_eq!(frame.body, "{\"id\":\"m1\"}");
    }

    #[test]
    fn parse_skips_heartbeats_and_handles_multiple_frames() {
        let raw = "\n\r\nRECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\ndestination:/d\n\nhello\0\n";
        let frames = Frame::parse_all(raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "hello");
    }

    #[test]
    fn pure_heartbeat_yields_no_frames() {
        assert!(Frame::parse_all("\n").unwrap().is_empty());
        assert!(Frame::parse_all("\r\n\n").unwrap().is_empty());
    }

    #[test]
    fn content_length_allows_embedded_nul() {
        let raw = "MESSAGE\ncontent-length:5\n\nab\0cd\0";
        let frames = Frame::parse_all(raw).unwrap();
        assert_eq!(frames[0].body, "ab\0cd");
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let raw = "CONNECTED\r\nversion:1.2\r\nheart-beat:15000,15000\r\n\r\n\0";
        let frames = Frame::parse_all(raw).unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].heart_beat(), Some((15_000, 15_000)));
    }

    #[test]
    fn escaped_headers_round_trip() {
        let frame = Frame::new(Command::Message).with_header("note", "a:b\\c\nd");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\\\c\\nd\n"));
        let parsed = Frame::parse_all(&encoded).unwrap();
        assert_eq!(parsed[0].header("note"), Some("a:b\\c\nd"));
    }

    #[test]
    fn undefined_escape_is_rejected() {
        let raw = "MESSAGE\nbad:\\t\n\n\0";
        assert!(matches!(Frame::parse_all(raw), Err(Error::Frame(_))));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Frame::parse_all("HELLO\n\n\0").is_err());
    }

    #[test]
    fn missing_terminator_is_rejected() {
        assert!(Frame::parse_all("MESSAGE\ndestination:/d\n\nbody").is_err());
    }

    #[test]
    fn oversized_content_length_is_rejected() {
        let raw = format!("MESSAGE\ndestination:/d\ncontent-length:{}\n\n{{}}\0", usize::MAX);
        let err = Frame::parse_all(&raw).unwrap_err();
        assert!(matches!(err, Error::Frame(_)), "got {err:?}");

        let raw = "MESSAGE\ndestination:/d\ncontent-length:50\n\n{}\0";
        assert!(Frame::parse_all(raw).is_err());
    }

    #[test]
    fn first_repeated_header_wins() {
        let raw = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frames = Frame::parse_all(raw).unwrap();
        assert_eq!(frames[0].header("foo"), Some("first"));
    }

    #[test]
    fn error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .with_header("message", "Missing or invalid JWT")
            .with_body("details");
        assert_eq!(frame.error_message(), "Missing or invalid JWT");

        let frame = Frame::new(Command::Error).with_body("  only body \n");
        assert_eq!(frame.error_message(), "only body");
    }

    #[test]
    fn heart_beat_negotiation() {
        assert_eq!(negotiate_heart_beat((10_000, 10_000), (15_000, 15_000)), (15_000, 15_000));
        assert_eq!(negotiate_heart_beat((0, 10_000), (15_000, 15_000)), (0, 15_000));
        assert_eq!(negotiate_heart_beat((10_000, 10_000), (0, 0)), (0, 0));
        assert_eq!(negotiate_heart_beat((20_000, 5_000), (1_000, 1_000)), (20_000, 5_000));
    }

    #[test]
    fn send_frame_sets_content_length() {
        let frame = Frame::send("/app/chat", "{\"text\":\"hi\"}");
        assert_eq!(frame.header("content-length"), Some("13"));
        let parsed = Frame::parse_all(&frame.encode()).unwrap();
        assert_eq!(parsed[0].body, "{\"text\":\"hi\"}");
    }
}
