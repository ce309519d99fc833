use std::{ops::Deref, sync::Arc};

/// SharedBytes is a reference-counted, sliceable byte buffer.
///
/// Message payloads move through the engine as `SharedBytes` so a broadcast
/// to N peers or a message split into chunks never copies the underlying
/// bytes: every view holds the same `Arc<[u8]>` plus a (start, len) window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBytes {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl SharedBytes {
    /// Creates a new SharedBytes from a Vec by taking ownership.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let arc: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = arc.len();
        Self { data: arc, start: 0, len }
    }

    /// Creates a new SharedBytes covering a full `Arc<[u8]>`.
    pub fn from_arc(data: Arc<[u8]>) -> Self {
        let len = data.len();
        Self { data, start: 0, len }
    }

    /// Creates a sub-slice view into the current buffer without copying.
    /// Panics if the requested range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start <= self.len, "slice start out of bounds");
        assert!(start + len <= self.len, "slice end out of bounds");
        Self { data: self.data.clone(), start: self.start + start, len }
    }

    /// Splits the view into consecutive windows of at most `chunk_size`
    /// bytes, without copying. The final window may be shorter. Used by the
    /// reliable channel to cut an oversized message into chunk messages.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = SharedBytes> + '_ {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        (0..self.len)
            .step_by(chunk_size)
            .map(move |start| self.slice(start, chunk_size.min(self.len - start)))
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for SharedBytes {
    fn from(s: &[u8]) -> Self {
        Self::from_vec(s.to_vec())
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_is_zero_copy_view() {
        let bytes = SharedBytes::from_vec(vec![1, 2, 3, 4, 5]);
        let mid = bytes.slice(1, 3);
        assert_eq!(mid.as_slice(), &[2, 3, 4]);
        assert_eq!(mid.len(), 3);

        let inner = mid.slice(1, 1);
        assert_eq!(inner.as_slice(), &[3]);
    }

    #[test]
    fn test_chunks_cover_whole_buffer() {
        let bytes = SharedBytes::from_vec((0u8..10).collect());
        let chunks: Vec<_> = bytes.chunks(4).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_slice(), &[0, 1, 2, 3]);
        assert_eq!(chunks[1].as_slice(), &[4, 5, 6, 7]);
        assert_eq!(chunks[2].as_slice(), &[8, 9]);
    }

    #[test]
    fn test_chunks_exact_multiple() {
        let bytes = SharedBytes::from_vec(vec![0; 8]);
        let chunks: Vec<_> = bytes.chunks(4).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[test]
    #[should_panic(expected = "slice end out of bounds")]
    fn test_slice_out_of_bounds_panics() {
        let bytes = SharedBytes::from_vec(vec![1, 2, 3]);
        let _ = bytes.slice(1, 3);
    }
}
