#![forbid(unsafe_code)]
//! Grow-only framing buffer used to amortize socket reads.
//!
//! Writing happens in two steps: `allocate` hands out the spare region at the
//! tail, the caller fills some prefix of it, then `written` commits that many
//! bytes. Consumed bytes are dropped from the front with `shift`. The readable
//! prefix is always contiguous at offset 0, and capacity never shrinks during
//! the buffer's lifetime.

/// Initial capacity of the backing storage.
const INITIAL_SIZE: usize = 64 * 1024;

pub struct Buffer {
    data: Vec<u8>,
    have: usize,
    #[cfg(debug_assertions)]
    last_allocation: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: vec![0; INITIAL_SIZE],
            have: 0,
            #[cfg(debug_assertions)]
            last_allocation: 0,
        }
    }

    /// Returns the spare region starting at the first unwritten byte.
    ///
    /// The returned slice is never empty: when the backing storage is
    /// exhausted it is grown geometrically first. Write into a prefix of the
    /// slice and commit it with [`Buffer::written`].
    pub fn allocate(&mut self) -> &mut [u8] {
        if self.have == self.data.len() {
            let grown = (self.data.len() * 2).max(INITIAL_SIZE);
            self.data.resize(grown, 0);
        }
        #[cfg(debug_assertions)]
        {
            self.last_allocation = self.data.len() - self.have;
        }
        &mut self.data[self.have..]
    }

    /// Commits `len` bytes of the region returned by the last `allocate`.
    pub fn written(&mut self, len: usize) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                len <= self.last_allocation,
                "written {} bytes into a {}-byte allocation",
                len,
                self.last_allocation
            );
            self.last_allocation -= len;
        }
        self.have += len;
        debug_assert!(self.have <= self.data.len());
    }

    /// Discards the first `len` readable bytes by left-moving the remainder.
    pub fn shift(&mut self, len: usize) {
        assert!(len <= self.have, "shift {} of {} bytes", len, self.have);
        self.data.copy_within(len..self.have, 0);
        self.have -= len;
    }

    /// Ensures backing capacity of at least `len` bytes. Never shrinks.
    pub fn resize(&mut self, len: usize) {
        if len > self.data.len() {
            self.data.resize(len, 0);
        }
    }

    /// Resets the readable size to zero. Capacity is retained.
    pub fn clear(&mut self) {
        self.have = 0;
    }

    /// The readable prefix.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.have]
    }

    /// Number of readable bytes.
    pub fn size(&self) -> usize {
        self.have
    }
}

#[cfg(test)]
mod tests {
    use super::{Buffer, INITIAL_SIZE};
    use proptest::prelude::*;

    fn put(buffer: &mut Buffer, bytes: &[u8]) {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let region = buffer.allocate();
            let n = region.len().min(remaining.len());
            region[..n].copy_from_slice(&remaining[..n]);
            buffer.written(n);
            remaining = &remaining[n..];
        }
    }

    #[test]
    fn write_then_read() {
        let mut buffer = Buffer::new();
        put(&mut buffer, b"hello");
        assert_eq!(buffer.size(), 5);
        assert_eq!(buffer.data(), b"hello");
    }

    #[test]
    fn shift_drops_prefix() {
        let mut buffer = Buffer::new();
        put(&mut buffer, b"hello world");
        buffer.shift(6);
        assert_eq!(buffer.data(), b"world");
    }

    #[test]
    fn grows_geometrically_past_initial_capacity() {
        let mut buffer = Buffer::new();
        let payload = vec![0xabu8; INITIAL_SIZE + 17];
        put(&mut buffer, &payload);
        assert_eq!(buffer.size(), payload.len());
        assert_eq!(buffer.data(), &payload[..]);
    }

    #[test]
    fn clear_retains_capacity() {
        let mut buffer = Buffer::new();
        put(&mut buffer, &vec![1u8; INITIAL_SIZE * 2]);
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.allocate().len() >= INITIAL_SIZE);
    }

    #[test]
    fn resize_never_shrinks() {
        let mut buffer = Buffer::new();
        buffer.resize(INITIAL_SIZE * 4);
        let large = buffer.allocate().len();
        buffer.resize(1);
        assert_eq!(buffer.allocate().len(), large);
    }

    #[test]
    #[should_panic(expected = "shift")]
    fn shift_past_size_panics() {
        let mut buffer = Buffer::new();
        put(&mut buffer, b"ab");
        buffer.shift(3);
    }

    proptest! {
        // The readable prefix equals all written bytes minus all shifted
        // prefixes, for any interleaving that respects the contract.
        #[test]
        fn readable_prefix_tracks_writes_and_shifts(
            ops in proptest::collection::vec(
                prop_oneof![
                    proptest::collection::vec(any::<u8>(), 1..512).prop_map(Op::Write),
                    (0usize..256).prop_map(Op::Shift),
                ],
                1..64,
            )
        ) {
            let mut buffer = Buffer::new();
            let mut model: Vec<u8> = Vec::new();
            for op in ops {
                match op {
                    Op::Write(bytes) => {
                        put(&mut buffer, &bytes);
                        model.extend_from_slice(&bytes);
                    }
                    Op::Shift(n) => {
                        let n = n.min(buffer.size());
                        buffer.shift(n);
                        model.drain(..n);
                    }
                }
                prop_assert_eq!(buffer.data(), &model[..]);
            }
        }
    }

    #[derive(Clone, Debug)]
    enum Op {
        Write(Vec<u8>),
        Shift(usize),
    }
}
