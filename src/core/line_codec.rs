//! Splits the inbound serial byte stream into `\r\n`-terminated lines.

use crate::domain::model::LINE_DELIMITER;

/// Upper bound on a partial line kept while waiting for its delimiter.
const MAX_PENDING_BYTES: usize = 4096;

#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed, without delimiters.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let delimiter = LINE_DELIMITER.as_bytes();
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(pos) = find(&self.pending[start..], delimiter) {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + delimiter.len();
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::warn!(
                "Dropping {} bytes of serial input without a line delimiter",
                self.pending.len()
            );
            self.pending.clear();
        }

        lines
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
