//! Token types and the tokenizer adapter.
//!
//! The engine owns the actual text↔token mapping; the adapter's job is
//! buffer sizing and the documented negative-size retry protocol for
//! rendering single tokens back to bytes.

use crate::engine::Model;
use crate::error::SessionError;

/// Token identifier, matching the engine's signed convention.
pub type TokenId = i32;

/// One vocabulary entry paired with the engine's score for it.
///
/// Built transiently from the logits of a decode step and handed to the
/// [`Sampler`](crate::sampler::Sampler); never retained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenCandidate {
    pub id: TokenId,
    pub score: f32,
}

/// Initial buffer size for [`token_bytes`]. Most tokens render to a handful
/// of bytes; the engine tells us the real size when this is too small.
const PIECE_BUF_LEN: usize = 8;

/// Encode text into engine token IDs.
///
/// The working buffer is sized at the worst case of one token per input byte,
/// plus one slot for the leading marker, then truncated to the count the
/// engine actually produced. Empty text yields just the marker (if requested)
/// or an empty vector.
pub fn tokenize(
    model: &dyn Model,
    text: &str,
    add_leading_marker: bool,
) -> Result<Vec<TokenId>, SessionError> {
    let max_out = text.len() + usize::from(add_leading_marker);
    let mut out = vec![0 as TokenId; max_out];

    let written = model.tokenize(text, &mut out, add_leading_marker);
    if written < 0 {
        return Err(SessionError::Tokenize(format!(
            "engine returned {} for a {}-byte input",
            written,
            text.len()
        )));
    }

    out.truncate(written as usize);
    Ok(out)
}

/// Render a single token to its raw bytes.
///
/// The engine signals "buffer too small" by returning the negated required
/// size; we retry exactly once with that size. A second negative return is an
/// engine contract violation, surfaced as [`SessionError::AdapterEncoding`].
pub fn token_bytes(model: &dyn Model, token: TokenId) -> Result<Vec<u8>, SessionError> {
    let mut buf = vec![0u8; PIECE_BUF_LEN];

    let mut written = model.detokenize(token, &mut buf);
    if written < 0 {
        buf.resize(written.unsigned_abs() as usize, 0);
        written = model.detokenize(token, &mut buf);
        if written < 0 {
            return Err(SessionError::AdapterEncoding {
                token,
                size: written,
            });
        }
    }

    buf.truncate(written as usize);
    Ok(buf)
}
