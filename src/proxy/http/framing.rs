use super::message::{HttpMessage, MessageError, find};

const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Returned by [`HttpMessage::remaining_hint`] when the reader cannot know how much is left.
pub const READ_MORE: usize = usize::MAX;

/// How the end of a message body is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Transfer-Encoding: chunked`; complete once the zero-length chunk arrives.
    Chunked,
    /// `Content-Length: n`.
    Length(usize),
    /// No body framing headers; the message ends at the header separator.
    UntilSeparator,
}

impl HttpMessage {
    /// Framing discipline declared by the head. Chunked encoding takes priority over
    /// `Content-Length`.
    pub fn framing(&self) -> Result<Framing, MessageError> {
        if !self.has_head() {
            return Err(MessageError::Incomplete);
        }
        if self.header("Transfer-Encoding").is_some_and(is_chunked) {
            return Ok(Framing::Chunked);
        }
        match self.header("Content-Length") {
            Some(value) => value
                .parse::<usize>()
                .map(Framing::Length)
                .map_err(|_| MessageError::InvalidContentLength(value.to_string())),
            None => Ok(Framing::UntilSeparator),
        }
    }

    /// Whether the buffered bytes form a complete message.
    ///
    /// An empty buffer counts as complete: there is no message yet, which is not an error.
    pub fn completion(&self) -> Result<bool, MessageError> {
        if self.is_empty() {
            return Ok(true);
        }
        if !self.has_head() {
            return Ok(false);
        }
        let body = self.body();
        Ok(match self.framing()? {
            Framing::Chunked => !body.is_empty() && find(body, CHUNKED_TERMINATOR).is_some(),
            Framing::Length(declared) => body.len() >= declared,
            Framing::UntilSeparator => true,
        })
    }

    /// Infallible form of [`completion`](Self::completion); a head with unusable framing
    /// headers counts as complete so the caller gets to inspect it.
    pub fn is_complete(&self) -> bool {
        self.completion().unwrap_or(true)
    }

    /// Polling hint for readers: `0` when nothing more is expected, the exact outstanding byte
    /// count for a `Content-Length` body, [`READ_MORE`] otherwise.
    pub fn remaining_hint(&self) -> usize {
        if self.is_empty() {
            return READ_MORE;
        }
        match self.completion() {
            Ok(true) | Err(_) => 0,
            Ok(false) => match self.framing() {
                Ok(Framing::Length(declared)) => declared.saturating_sub(self.body().len()),
                _ => READ_MORE,
            },
        }
    }
}

fn is_chunked(value: &str) -> bool {
    value
        .split(',')
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}
