use http::StatusCode;
use thiserror::Error;

pub(crate) const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Structural problems found while deriving fields from a message buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message head has not been fully received")]
    Incomplete,
    #[error("malformed status line: {0}")]
    MalformedStatusLine(String),
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("message exceeds configured limit of {limit} bytes")]
    TooLarge { limit: usize },
}

/// An HTTP/1.x message accumulated from a byte stream.
///
/// The raw bytes are the source of truth; the start line, headers and body are views computed
/// on demand. Nothing past the `\r\n\r\n` separator is meaningful until the separator arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    raw: Vec<u8>,
    head_end: Option<usize>,
}

impl HttpMessage {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let head_end = find(&raw, HEADER_SEPARATOR);
        Self { raw, head_end }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Extends the buffer with the next chunk read from the wire.
    pub fn append(&mut self, chunk: &[u8]) {
        let previous = self.raw.len();
        self.raw.extend_from_slice(chunk);
        if self.head_end.is_none() {
            // The separator may straddle the previous chunk boundary.
            let start = previous.saturating_sub(HEADER_SEPARATOR.len() - 1);
            self.head_end = find(&self.raw[start..], HEADER_SEPARATOR).map(|pos| pos + start);
        }
    }

    pub fn has_head(&self) -> bool {
        self.head_end.is_some()
    }

    /// Start line and header lines, without the terminating separator.
    pub fn head(&self) -> Option<&[u8]> {
        self.head_end.map(|end| &self.raw[..end])
    }

    /// Bytes after the separator; empty until the separator has been seen.
    pub fn body(&self) -> &[u8] {
        match self.head_end {
            Some(end) => &self.raw[end + HEADER_SEPARATOR.len()..],
            None => &[],
        }
    }

    pub(crate) fn head_end(&self) -> Option<usize> {
        self.head_end
    }

    pub(crate) fn insert_into_head(&mut self, at: usize, bytes: &[u8]) {
        self.raw.splice(at..at, bytes.iter().copied());
        self.head_end = find(&self.raw, HEADER_SEPARATOR);
    }

    /// Drops every header line named `name` (case-insensitive). Returns how many were removed.
    pub(crate) fn remove_header(&mut self, name: &str) -> usize {
        let Some(head) = self.head() else {
            return 0;
        };
        let mut lines = head_lines(head);
        let total = lines.len();
        let mut idx = 0;
        lines.retain(|line| {
            idx += 1;
            idx == 1 || !line_has_name(line, name)
        });
        let removed = total - lines.len();
        if removed == 0 {
            return 0;
        }

        let mut rebuilt = lines.join(&b"\r\n"[..]);
        if let Some(end) = self.head_end {
            rebuilt.extend_from_slice(&self.raw[end..]);
        }
        self.raw = rebuilt;
        self.head_end = find(&self.raw, HEADER_SEPARATOR);
        removed
    }

    pub fn start_line(&self) -> Option<&str> {
        let head = self.head()?;
        let line_end = find(head, b"\r\n").unwrap_or(head.len());
        std::str::from_utf8(&head[..line_end]).ok()
    }

    /// Header fields in wire order. Lines that are not valid UTF-8 or lack a colon are skipped.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        let head = self.head().unwrap_or_default();
        head.split(|byte| *byte == b'\n')
            .skip(1)
            .filter_map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let line = std::str::from_utf8(line).ok()?;
                let (name, value) = line.split_once(':')?;
                Some((name.trim(), value.trim()))
            })
    }

    /// Case-insensitive header lookup; the last occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
            .last()
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host").filter(|host| !host.is_empty())
    }

    pub fn method(&self) -> Option<&str> {
        self.start_line()?.split(' ').next().filter(|m| !m.is_empty())
    }

    pub fn target(&self) -> Option<&str> {
        self.start_line()?.split(' ').nth(1).filter(|t| !t.is_empty())
    }

    /// Status code of a response. Fails instead of guessing when the status line is absent or
    /// too short to hold a three-digit code.
    pub fn status_code(&self) -> Result<StatusCode, MessageError> {
        let line = self.start_line().ok_or(MessageError::Incomplete)?;
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(MessageError::MalformedStatusLine(line.to_string()));
        }
        let code = parts
            .next()
            .filter(|code| code.len() == 3)
            .ok_or_else(|| MessageError::MalformedStatusLine(line.to_string()))?;
        StatusCode::from_bytes(code.as_bytes())
            .map_err(|_| MessageError::MalformedStatusLine(line.to_string()))
    }
}

impl From<Vec<u8>> for HttpMessage {
    fn from(raw: Vec<u8>) -> Self {
        Self::new(raw)
    }
}

impl From<&[u8]> for HttpMessage {
    fn from(raw: &[u8]) -> Self {
        Self::new(raw.to_vec())
    }
}

impl From<&str> for HttpMessage {
    fn from(raw: &str) -> Self {
        Self::new(raw.as_bytes().to_vec())
    }
}

fn head_lines(head: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut rest = head;
    while let Some(pos) = find(rest, b"\r\n") {
        lines.push(&rest[..pos]);
        rest = &rest[pos + 2..];
    }
    lines.push(rest);
    lines
}

fn line_has_name(line: &[u8], name: &str) -> bool {
    line.iter()
        .position(|byte| *byte == b':')
        .and_then(|colon| std::str::from_utf8(&line[..colon]).ok())
        .is_some_and(|field| field.trim().eq_ignore_ascii_case(name))
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
