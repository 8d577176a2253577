//! `zlib-stream` payload decompression, used when a shard negotiates
//! `compress=zlib-stream` on identify.

#[cfg(feature = "zlib-stock")]
use flate2::{Decompress, DecompressError, FlushDecompress};

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;

/// Incrementally inflates a `zlib-stream`-compressed shard connection.
///
/// Discord splits each logical payload across one or more WebSocket frames;
/// a payload is complete only once the accumulated bytes end in the
/// four-byte zlib flush suffix.
#[cfg(feature = "zlib-stock")]
pub struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    internal_buffer: Vec<u8>,
    buffer: Vec<u8>,
}

#[cfg(feature = "zlib-stock")]
impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
        }
    }

    /// Feed in the next chunk of a frame.
    pub fn extend(&mut self, slice: &[u8]) {
        self.compressed.extend_from_slice(slice);
    }

    /// Inflate the accumulated bytes if they form a complete payload.
    ///
    /// Returns `None` if the payload is still incomplete, leaving the
    /// accumulated bytes in place for the next [`Inflater::extend`].
    pub fn message(&mut self) -> Result<Option<&[u8]>, DecompressError> {
        let length = self.compressed.len();

        if length < 4 || self.compressed[(length - 4)..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        self.buffer.clear();
        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.internal_buffer.clear();

            self.decompress.decompress_vec(
                &self.compressed[offset..],
                &mut self.internal_buffer,
                FlushDecompress::Sync,
            )?;

            offset = usize::try_from(self.decompress.total_in() - before).unwrap_or_default();
            self.buffer.extend_from_slice(&self.internal_buffer);

            let not_at_capacity = self.internal_buffer.len() < self.internal_buffer.capacity();

            if not_at_capacity || offset > self.compressed.len() {
                break;
            }
        }

        self.compressed.clear();

        Ok(Some(&self.buffer))
    }
}

#[cfg(feature = "zlib-stock")]
impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "zlib-stock"))]
mod tests {
    use super::Inflater;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    fn compress(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflates_a_complete_payload() {
        let mut inflater = Inflater::new();
        let compressed = compress(br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);

        inflater.extend(&compressed);
        let message = inflater.message().unwrap().unwrap();

        assert_eq!(message, br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
    }

    #[test]
    fn incomplete_payload_yields_none() {
        let mut inflater = Inflater::new();
        let compressed = compress(br#"{"op":10}"#);

        inflater.extend(&compressed[..compressed.len() - 2]);
        assert!(inflater.message().unwrap().is_none());
    }
}
