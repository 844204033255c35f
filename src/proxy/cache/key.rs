use std::fmt;

use crate::proxy::http::HttpMessage;

/// Identity of a cached response: the exact bytes of the request that produced it.
///
/// Two requests differing in any byte, header order and case included, are different keys.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(Vec<u8>);

impl RequestKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&HttpMessage> for RequestKey {
    fn from(message: &HttpMessage) -> Self {
        Self(message.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for RequestKey {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

impl From<&str> for RequestKey {
    fn from(raw: &str) -> Self {
        Self(raw.as_bytes().to_vec())
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line_end = self
            .0
            .iter()
            .position(|byte| *byte == b'\r' || *byte == b'\n')
            .unwrap_or(self.0.len());
        f.debug_tuple("RequestKey")
            .field(&String::from_utf8_lossy(&self.0[..line_end]))
            .field(&self.0.len())
            .finish()
    }
}

/// Index key. Unused cells sit in the index under their own placeholder so that every cell
/// is tracked from startup and no request can ever alias a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum SlotKey {
    Vacant(usize),
    Request(RequestKey),
}

impl SlotKey {
    pub(super) fn is_vacant(&self) -> bool {
        matches!(self, SlotKey::Vacant(_))
    }
}
