//! Byte-counter statistics for DICOM network connections.
//!
//! Each connection owns one [`Statistics`] instance,
//! shared between the connection driver and its metered transport stream.
//! Counters from finished connections can be merged into an aggregate,
//! which is how the server reports totals across its lifetime.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Byte counters scoped to a single connection.
///
/// The counters are atomic so that one instance can be observed
/// while the connection is still moving data.
/// Merging is associative and commutative over both counters.
#[derive(Debug, Default)]
pub struct Statistics {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Statistics {
    /// Create a fresh pair of zeroed counters.
    pub fn new() -> Self {
        Statistics::default()
    }

    /// The number of bytes received so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// The number of bytes sent so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Account for `count` more bytes received.
    pub fn add_bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    /// Account for `count` more bytes sent.
    pub fn add_bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Add another instance's counters into this one.
    pub fn merge(&self, other: &Statistics) {
        self.add_bytes_read(other.bytes_read());
        self.add_bytes_written(other.bytes_written());
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

impl Clone for Statistics {
    fn clone(&self) -> Self {
        Statistics {
            bytes_read: AtomicU64::new(self.bytes_read()),
            bytes_written: AtomicU64::new(self.bytes_written()),
        }
    }
}

/// A transport stream wrapper which accounts all traffic
/// into a shared [`Statistics`] instance.
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    statistics: Arc<Statistics>,
}

impl<S> MeteredStream<S> {
    /// Wrap a stream, accounting its traffic into `statistics`.
    pub fn new(inner: S, statistics: Arc<Statistics>) -> Self {
        MeteredStream { inner, statistics }
    }

    /// Obtain the shared statistics handle.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    /// Access the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Access the wrapped stream mutably.
    ///
    /// Traffic performed directly on the inner stream is not accounted.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Read for MeteredStream<S>
where
    S: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.statistics.add_bytes_read(count as u64);
        Ok(count)
    }
}

impl<S> Write for MeteredStream<S>
where
    S: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.statistics.add_bytes_written(count as u64);
        Ok(count)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn accounts_reads_and_writes() {
        let stats = Arc::new(Statistics::new());
        let mut stream = MeteredStream::new(std::io::Cursor::new(vec![0_u8; 64]), stats.clone());

        let mut buf = [0_u8; 24];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&[1_u8; 10]).unwrap();

        assert_eq!(stats.bytes_read(), 24);
        assert_eq!(stats.bytes_written(), 10);
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let a = Statistics::new();
        a.add_bytes_read(10);
        a.add_bytes_written(1);
        let b = Statistics::new();
        b.add_bytes_read(20);
        b.add_bytes_written(2);

        // (a into b) then (b into c)
        let c1 = Statistics::new();
        let b1 = b.clone();
        b1.merge(&a);
        c1.merge(&b1);

        // a and b independently into c
        let c2 = Statistics::new();
        c2.merge(&a);
        c2.merge(&b);

        assert_eq!(c1.bytes_read(), c2.bytes_read());
        assert_eq!(c1.bytes_written(), c2.bytes_written());
        assert_eq!(c1.bytes_read(), 30);
        assert_eq!(c1.bytes_written(), 3);
    }

    #[test]
    fn reset_zeroes_counters() {
        let stats = Statistics::new();
        stats.add_bytes_read(100);
        stats.add_bytes_written(50);
        stats.reset();
        assert_eq!(stats.bytes_read(), 0);
        assert_eq!(stats.bytes_written(), 0);
    }
}
