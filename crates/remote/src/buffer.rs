//! Download buffers.
//!
//! Small downloads stay in memory, in a `Vec` borrowed from a [`BufferPool`]
//! and handed back when the buffer drops. Anything declared (or discovered)
//! to be larger than the spool threshold goes to an anonymous temporary file
//! instead, which the OS cleans up once it's closed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Recycles in-memory download buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    retain: usize,
    max_capacity: usize,
}

impl BufferPool {
    /// Keep at most `retain` idle buffers, discarding any that grew beyond
    /// `max_capacity` bytes.
    pub fn new(retain: usize, max_capacity: usize) -> Self {
        Self { buffers: Mutex::new(Vec::with_capacity(retain)), retain, max_capacity }
    }

    fn take(&self, capacity: usize) -> Vec<u8> {
        let recycled = self.buffers.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut buffer = recycled.unwrap_or_default();
        buffer.reserve(capacity);
        buffer
    }

    fn give(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() == 0 || buffer.capacity() > self.max_capacity {
            return;
        }
        buffer.clear();
        let mut idle = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.retain {
            idle.push(buffer);
        }
    }

    /// Number of buffers waiting to be reused.
    pub fn idle(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16, 16 * 1024 * 1024)
    }
}

enum Storage {
    Memory { data: Vec<u8>, position: u64, pool: Arc<BufferPool> },
    Spooled(File),
}

/// A random-access byte buffer for one download.
///
/// Supports out-of-order writes (chunks arrive in any order) and, once
/// rewound, sequential reads and seeks, so it can be fed straight into an
/// archive reader or a hasher.
pub struct PackageBuffer {
    storage: Storage,
    len: u64,
    spool_threshold: u64,
}

impl PackageBuffer {
    /// Allocate a buffer for a download of roughly `expected_size` bytes.
    pub fn new(expected_size: u64, spool_threshold: u64, pool: &Arc<BufferPool>) -> io::Result<Self> {
        let storage = if expected_size > spool_threshold {
            Storage::Spooled(tempfile::tempfile()?)
        } else {
            let capacity = usize::try_from(expected_size).unwrap_or(0);
            Storage::Memory { data: pool.take(capacity), position: 0, pool: Arc::clone(pool) }
        };
        Ok(Self { storage, len: 0, spool_threshold })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, Storage::Spooled(_))
    }

    /// Write `data` at `offset`, zero-filling any gap before it.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let end = u64::try_from(data.len())
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write past the end of the addressable range"))?;
        if end > self.spool_threshold {
            self.spill()?;
        }
        match &mut self.storage {
            Storage::Memory { data: buffer, .. } => {
                let start = usize::try_from(offset).map_err(io::Error::other)?;
                let end = usize::try_from(end).map_err(io::Error::other)?;
                if buffer.len() < end {
                    buffer.resize(end, 0);
                }
                buffer[start..end].copy_from_slice(data);
            },
            Storage::Spooled(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
            },
        }
        self.len = self.len.max(end);
        Ok(())
    }

    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_at(self.len, data)
    }

    /// Move in-memory contents to a temporary file.
    fn spill(&mut self) -> io::Result<()> {
        let Storage::Memory { data, position, pool } = &mut self.storage else {
            return Ok(());
        };
        let mut file = tempfile::tempfile()?;
        file.write_all(data)?;
        file.seek(SeekFrom::Start(*position))?;
        pool.give(std::mem::take(data));
        self.storage = Storage::Spooled(file);
        Ok(())
    }
}

impl Read for PackageBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.storage {
            Storage::Memory { data, position, .. } => {
                let start = usize::try_from(*position).unwrap_or(usize::MAX).min(data.len());
                let count = buf.len().min(data.len() - start);
                buf[..count].copy_from_slice(&data[start..start + count]);
                *position += count as u64;
                Ok(count)
            },
            Storage::Spooled(file) => file.read(buf),
        }
    }
}

impl Seek for PackageBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.storage {
            Storage::Memory { data, position, .. } => {
                let target = match pos {
                    SeekFrom::Start(offset) => Some(offset),
                    SeekFrom::End(delta) => (data.len() as u64).checked_add_signed(delta),
                    SeekFrom::Current(delta) => position.checked_add_signed(delta),
                };
                let Some(target) = target else {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of buffer"));
                };
                *position = target;
                Ok(target)
            },
            Storage::Spooled(file) => file.seek(pos),
        }
    }
}

impl Drop for PackageBuffer {
    fn drop(&mut self) {
        if let Storage::Memory { data, pool, .. } = &mut self.storage {
            pool.give(std::mem::take(data));
        }
    }
}

impl std::fmt::Debug for PackageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageBuffer").field("len", &self.len).field("spooled", &self.is_spooled()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(buffer: &mut PackageBuffer) -> Vec<u8> {
        buffer.rewind().unwrap();
        let mut out = Vec::new();
        buffer.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_out_of_order_writes() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(8, 1024, &pool).unwrap();
        buffer.write_at(4, b"5678").unwrap();
        buffer.write_at(0, b"1234").unwrap();
        assert_eq!(buffer.len(), 8);
        assert!(!buffer.is_spooled());
        assert_eq!(read_all(&mut buffer), b"12345678");
    }

    #[test]
    fn test_gap_is_zero_filled() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(0, 1024, &pool).unwrap();
        buffer.write_at(3, b"x").unwrap();
        assert_eq!(read_all(&mut buffer), b"\0\0\0x");
    }

    #[test]
    fn test_write_past_addressable_range_is_rejected() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(0, 1024, &pool).unwrap();
        let err = buffer.write_at(u64::MAX - 1, b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buffer.is_empty());
        assert!(!buffer.is_spooled());
    }

    #[test]
    fn test_large_declared_size_spools() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(4096, 1024, &pool).unwrap();
        assert!(buffer.is_spooled());
        buffer.write_at(2, b"cd").unwrap();
        buffer.write_at(0, b"ab").unwrap();
        assert_eq!(read_all(&mut buffer), b"abcd");
    }

    #[test]
    fn test_growth_past_threshold_spills() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(4, 8, &pool).unwrap();
        buffer.append(b"0123").unwrap();
        assert!(!buffer.is_spooled());
        buffer.append(b"456789").unwrap();
        assert!(buffer.is_spooled());
        assert_eq!(read_all(&mut buffer), b"0123456789");
    }

    #[test]
    fn test_memory_is_returned_to_pool() {
        let pool = Arc::new(BufferPool::new(1, 1024));
        {
            let mut buffer = PackageBuffer::new(16, 1024, &pool).unwrap();
            buffer.append(b"data").unwrap();
        }
        assert_eq!(pool.idle(), 1);
        let buffer = PackageBuffer::new(16, 1024, &pool).unwrap();
        assert_eq!(pool.idle(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_buffers_are_not_retained() {
        let pool = Arc::new(BufferPool::new(4, 8));
        drop(PackageBuffer::new(64, 1024, &pool).unwrap());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_seek() {
        let pool = Arc::new(BufferPool::default());
        let mut buffer = PackageBuffer::new(6, 1024, &pool).unwrap();
        buffer.append(b"abcdef").unwrap();
        assert_eq!(buffer.seek(SeekFrom::End(-2)).unwrap(), 4);
        let mut tail = String::new();
        buffer.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "ef");
        assert!(buffer.seek(SeekFrom::Current(-10)).is_err());
    }
}
