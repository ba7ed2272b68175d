//! Byte reassembly buffer for token output.
//!
//! Engines emit raw bytes per token, and a multi-byte UTF-8 codepoint can be
//! spread across several single-token steps. Bytes are buffered here until a
//! valid text boundary exists, so a truncated codepoint is never emitted.
//! This is a correctness path, not a hot path: the per-step suffix scan is
//! deliberately exhaustive and simple.

/// Raw output bytes awaiting a valid text boundary.
#[derive(Debug, Default)]
pub struct PendingBytes {
    buf: Vec<u8>,
}

impl PendingBytes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token's rendered bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Emit what can be emitted after this step, per the reassembly rule:
    ///
    /// - whole buffer is valid UTF-8: emit it and clear;
    /// - otherwise, scan suffixes shortest-first; if *any* suffix decodes
    ///   validly, emit the whole buffer lossily (a genuinely invalid prefix
    ///   is accepted rather than held forever) and clear;
    /// - otherwise emit nothing and keep the buffer — the tail is an
    ///   incomplete codepoint still being produced token by token.
    pub fn drain_decodable(&mut self) -> String {
        if self.buf.is_empty() {
            return String::new();
        }

        match std::str::from_utf8(&self.buf) {
            Ok(_) => {
                let bytes = std::mem::take(&mut self.buf);
                // Just validated above.
                String::from_utf8(bytes).unwrap_or_default()
            }
            Err(_) => {
                let any_suffix_decodes = (1..self.buf.len())
                    .any(|n| std::str::from_utf8(&self.buf[self.buf.len() - n..]).is_ok());
                if any_suffix_decodes {
                    let bytes = std::mem::take(&mut self.buf);
                    String::from_utf8_lossy(&bytes).into_owned()
                } else {
                    String::new()
                }
            }
        }
    }

    /// Force everything out, replacing whatever is undecodable. Used at the
    /// end of generation so no buffered bytes are silently dropped.
    pub fn flush_lossy(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}
