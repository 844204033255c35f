//! Incrementally accumulated HTTP/1.x messages.
//!
//! Bytes are appended as they arrive from a socket; framing, header lookups and the status
//! line are derived from the raw buffer on demand.

mod conditional;
mod framing;
mod message;

pub use framing::{Framing, READ_MORE};
pub use message::{HttpMessage, MessageError};

/// Literal response returned to clients whose origin cannot be reached.
pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
