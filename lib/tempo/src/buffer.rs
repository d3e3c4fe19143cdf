/// A dynamically sized buffered FIFO byte queue. Data is appended at the
/// tail and read from the head; `consume` releases bytes after the caller has
/// parsed them, which keeps partially received frames in place across reads.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
}

// Compact once the dead prefix crosses this threshold, so the backing vector
// does not grow without bound on long-lived streams.
const COMPACT_THRESHOLD: usize = 16384;

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// The number of readable bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Returns true in case the buffer holds no readable bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends bytes at the tail.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Slice containing all readable data, starting at the oldest byte.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Releases `count` bytes from the head.
    ///
    /// Panics if `count` exceeds the readable length.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        assert!(
            count <= self.len(),
            "Consumed {} bytes from a buffer holding {}",
            count,
            self.len()
        );

        self.head += count;

        if self.head >= COMPACT_THRESHOLD {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Moves up to `out.len()` readable bytes into `out`, returning the count.
    #[inline]
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let count = usize::min(out.len(), self.len());
        out[..count].copy_from_slice(&self.read_slice()[..count]);
        self.consume(count);
        count
    }
}
