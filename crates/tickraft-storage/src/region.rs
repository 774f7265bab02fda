//! # region
//!
//! why: the log is written to two byte regions that may live on disk or in
//! memory, and both need an explicit durability barrier
//! relations: opened by Log, implemented for std::fs::File and MemoryRegion
//! what: Region trait, MemoryRegion with a shareable buffer

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A seekable byte store with a durability barrier.
pub trait Region: Read + Write + Seek + Send {
    fn len(&self) -> io::Result<u64>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Make every completed write durable before returning.
    fn sync(&mut self) -> io::Result<()>;
}

impl Region for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

/// In-memory region. Clones share the same bytes but keep their own cursor,
/// so a log can be closed and reopened over the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegion {
    bytes: Arc<Mutex<Vec<u8>>>,
    pos: u64,
}

impl MemoryRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle over the same bytes, positioned at the start.
    pub fn reopen(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
            pos: 0,
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for MemoryRegion {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = {
            let bytes = self.lock();
            let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(bytes.len());
            let n = buf.len().min(bytes.len() - start);
            buf[..n].copy_from_slice(&bytes[start..start + n]);
            n
        };
        self.pos += read as u64;
        Ok(read)
    }
}

impl Write for MemoryRegion {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut bytes = self.lock();
            let start = usize::try_from(self.pos)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position overflow"))?;
            let end = start + buf.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[start..end].copy_from_slice(buf);
        }
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryRegion {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.lock().len() as i128;
        let target = match pos {
            SeekFrom::Start(at) => at as i128,
            SeekFrom::End(delta) => len + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of region",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl Region for MemoryRegion {
    fn len(&self) -> io::Result<u64> {
        Ok(self.lock().len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflow"))?;
        self.lock().resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
