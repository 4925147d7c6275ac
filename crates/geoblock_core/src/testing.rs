//! Backends with injected failures.

use geoblock_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;

/// In-memory backend that fails writes after a budget or on every sync.
pub(crate) struct FailingBackend {
    inner: InMemoryBackend,
    writes_left: Option<usize>,
    fail_sync: bool,
}

impl FailingBackend {
    /// Succeeds `writes` times, then fails every `write_at`.
    pub(crate) fn failing_writes_after(writes: usize) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            writes_left: Some(writes),
            fail_sync: false,
        }
    }

    /// Accepts every write but fails `sync`.
    pub(crate) fn failing_sync() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            writes_left: None,
            fail_sync: true,
        }
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("injected {what} failure")))
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        match self.writes_left.as_mut() {
            Some(0) => return Err(injected("write")),
            Some(left) => *left -= 1,
            None => {}
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.fail_sync {
            return Err(injected("sync"));
        }
        self.inner.sync()
    }
}
