use std::time::SystemTime;

use super::message::{HttpMessage, MessageError};

impl HttpMessage {
    /// Sets `If-Modified-Since: <IMF-fixdate>` as the last header line, replacing any
    /// `If-Modified-Since` the message already carried.
    pub fn add_conditional_header(&mut self, modified_since: SystemTime) -> Result<(), MessageError> {
        if !self.has_head() {
            return Err(MessageError::Incomplete);
        }
        self.remove_header("If-Modified-Since");
        let head_end = self.head_end().ok_or(MessageError::Incomplete)?;
        let line = format!(
            "If-Modified-Since: {}\r\n",
            httpdate::fmt_http_date(modified_since)
        );
        // Right after the CRLF that terminates the last header line.
        self.insert_into_head(head_end + 2, line.as_bytes());
        Ok(())
    }

    /// Copy of this message carrying the conditional header; `self` is left untouched.
    pub fn with_conditional_header(&self, modified_since: SystemTime) -> Result<Self, MessageError> {
        let mut conditional = self.clone();
        conditional.add_conditional_header(modified_since)?;
        Ok(conditional)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn inserts_header_before_separator() {
        let mut message =
            HttpMessage::from("GET / HTTP/1.1\r\nHost: example.com\r\n\r\nbody");
        let stamp = UNIX_EPOCH + Duration::from_secs(784_111_777);
        message.add_conditional_header(stamp).unwrap();
        assert_eq!(
            message.as_bytes(),
            b"GET / HTTP/1.1\r\nHost: example.com\r\nIf-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\nbody"
        );
        assert_eq!(
            message.header("if-modified-since"),
            Some("Sun, 06 Nov 1994 08:49:37 GMT")
        );
        assert_eq!(message.body(), b"body");
    }

    #[test]
    fn replaces_existing_if_modified_since() {
        let mut message = HttpMessage::from(
            "GET / HTTP/1.1\r\nif-modified-since: Thu, 01 Jan 1970 00:00:00 GMT\r\nHost: example.com\r\n\r\n",
        );
        let stamp = UNIX_EPOCH + Duration::from_secs(784_111_777);
        message.add_conditional_header(stamp).unwrap();
        assert_eq!(
            message.as_bytes(),
            b"GET / HTTP/1.1\r\nHost: example.com\r\nIf-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n"
        );
        let conditionals = message
            .headers()
            .filter(|(name, _)| name.eq_ignore_ascii_case("If-Modified-Since"))
            .count();
        assert_eq!(conditionals, 1);
    }

    #[test]
    fn conditional_copy_leaves_original_alone() {
        let original = HttpMessage::from("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let conditional = original
            .with_conditional_header(SystemTime::now())
            .unwrap();
        assert_ne!(original, conditional);
        assert_eq!(original.header("If-Modified-Since"), None);
        assert!(conditional.header("If-Modified-Since").is_some());
    }

    #[test]
    fn incomplete_head_is_rejected() {
        let mut message = HttpMessage::from("GET / HTTP/1.1\r\nHost: exa");
        assert_eq!(
            message.add_conditional_header(SystemTime::now()),
            Err(MessageError::Incomplete)
        );
    }
}
