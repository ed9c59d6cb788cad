//! Line framing for agent output.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length to prevent memory exhaustion caused by unterminated or maliciously
//! large output from a misbehaving agent process. The same codec frames the
//! host's JSON-RPC stream in [`crate::rpc`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec with a bounded line length.
///
/// # Decoder
///
/// Returns `Ok(None)` while `src` holds no complete line, so a partial
/// trailing fragment stays in the buffer until the rest of it arrives.
/// Lines longer than the limit return [`AppError::Parse`]`("line too long: …")`;
/// lines that are not valid UTF-8 return [`AppError::Parse`]`("invalid utf-8: …")`.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_length;
        self.inner
            .decode(src)
            .map_err(|e| map_codec_error(e, max))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_length;
        self.inner
            .decode_eof(src)
            .map_err(|e| map_codec_error(e, max))
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        let max = self.max_length;
        self.inner
            .encode(item, dst)
            .map_err(|e| map_codec_error(e, max))
    }
}

fn map_codec_error(e: LinesCodecError, max: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Parse(format!("line too long: exceeded {max} bytes"))
        }
        LinesCodecError::Io(io_err) if io_err.kind() == std::io::ErrorKind::InvalidData => {
            AppError::Parse(format!("invalid utf-8: {io_err}"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
