/// A simple buffer pool that recycles sealed-packet buffers on the send path.
///
/// Packet assembly and the driver hand buffers back after each send, so a
/// steady-state endpoint performs no allocation per packet beyond the
/// pre-sized windows.
pub struct PacketBufferPool {
    /// Pool of reusable buffers
    pool: Vec<Vec<u8>>,
    /// Capacity reserved for freshly allocated buffers
    buffer_size: usize,
    /// Maximum number of buffers retained
    max_pool_size: usize,
}

impl PacketBufferPool {
    /// Creates a new buffer pool.
    pub fn new(buffer_size: usize, max_pool_size: usize) -> Self {
        Self { pool: Vec::with_capacity(max_pool_size), buffer_size, max_pool_size }
    }

    /// Takes a cleared buffer from the pool, or allocates a new one.
    pub fn acquire(&mut self) -> Vec<u8> {
        self.pool.pop().unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Returns a buffer to the pool for reuse.
    pub fn release(&mut self, mut buffer: Vec<u8>) {
        if self.pool.len() < self.max_pool_size {
            buffer.clear();
            self.pool.push(buffer);
        }
    }

    /// Returns the number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

impl Default for PacketBufferPool {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_PACKET_SIZE, 64)
    }
}
