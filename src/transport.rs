use crate::Result;
use std::time::Duration;

/// Half-duplex byte link to the board chain.
///
/// Responses are matched to requests only by arriving next, so callers must
/// clear the input buffer before every exchange that expects a reply.
pub trait Transport {
    /// Writes the whole buffer, returning the number of bytes written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Reads up to `n` bytes, giving up after `timeout`. Fewer than `n` bytes
    /// (possibly none) are returned when the link goes quiet.
    fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Discards everything received but not read yet.
    fn clear_input_buffer(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).write(bytes)
    }

    fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_exactly(n, timeout)
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        (**self).clear_input_buffer()
    }
}
