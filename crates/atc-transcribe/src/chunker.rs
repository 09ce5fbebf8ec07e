/// Accumulates raw PCM bytes and emits fixed-duration chunks.
///
/// Invariant (`spec.md` §4.5): every emitted chunk is exactly `chunk_bytes`
/// long; a partial trailing chunk is retained across calls and only
/// emitted once it fills, bounding STT latency at `chunk_ms` without ever
/// sending a malformed short frame.
pub struct Chunker {
    buf: Vec<u8>,
    chunk_bytes: usize,
}

impl Chunker {
    pub fn new(sample_rate: u32, channels: u16, chunk_ms: u32) -> Self {
        let bytes_per_sample = 2; // s16le
        let chunk_bytes =
            (sample_rate as u64 * channels as u64 * bytes_per_sample * chunk_ms as u64 / 1000) as usize;
        Self {
            buf: Vec::with_capacity(chunk_bytes * 2),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    /// Feed newly-read bytes; returns zero or more full chunks ready to send.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut chunks = Vec::new();
        while self.buf.len() >= self.chunk_bytes {
            chunks.push(self.buf.drain(..self.chunk_bytes).collect());
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_matches_the_requested_duration() {
        // 16kHz mono s16le, 100ms => 16000 * 2 * 100 / 1000 = 3200 bytes.
        let chunker = Chunker::new(16_000, 1, 100);
        assert_eq!(chunker.chunk_bytes, 3200);
    }

    #[test]
    fn partial_trailing_audio_is_retained_across_pushes() {
        let mut chunker = Chunker::new(16_000, 1, 100);
        let first = chunker.push(&vec![0u8; 2000]);
        assert!(first.is_empty());
        let second = chunker.push(&vec![0u8; 2000]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].len(), 3200);
        // The 800 leftover bytes from the second push carry into the buffer.
        let third = chunker.push(&vec![0u8; 2400]);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn exact_multiple_produces_no_leftover() {
        let mut chunker = Chunker::new(8_000, 1, 50);
        // chunk_bytes = 8000*2*50/1000 = 800
        let chunks = chunker.push(&vec![0u8; 1600]);
        assert_eq!(chunks.len(), 2);
        assert!(chunker.buf.is_empty());
    }
}
