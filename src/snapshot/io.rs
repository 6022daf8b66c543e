use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};

use crate::hasher::Hasher;

/// Per-call byte cap. Large reads and writes are split so the progress
/// callback fires at a bounded cadence.
const DEFAULT_CHUNK: usize = 1024 * 1024;

/// A backend that can make written bytes durable. Only the file-backed
/// writer does real work; everything else is a no-op.
pub trait Syncable {
    fn durable_sync(&mut self) -> std::io::Result<()>;
}

impl Syncable for BufWriter<File> {
    fn durable_sync(&mut self) -> std::io::Result<()> {
        self.flush()?;
        self.get_ref().sync_data()
    }
}

impl Syncable for Cursor<Vec<u8>> {
    fn durable_sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Uniform byte stream over a file or an in-memory buffer.
///
/// Wraps any `Read` or `Write` backend, maintaining a running CRC64 over
/// every byte moved (when enabled), a byte position for `tell`, an optional
/// auto-sync policy that makes the file durable every K written bytes, and
/// an optional progress callback through which a long save or load can yield
/// to do background work.
pub struct SnapshotIo<T> {
    inner: T,
    hasher: Option<Hasher>,
    pos: u64,
    chunk: usize,
    sync_every: u64,
    since_sync: u64,
    progress: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<T> SnapshotIo<T> {
    pub fn new(inner: T, checksum: bool) -> Self {
        Self {
            inner,
            hasher: checksum.then(Hasher::new),
            pos: 0,
            chunk: DEFAULT_CHUNK,
            sync_every: 0,
            since_sync: 0,
            progress: None,
        }
    }

    /// Durably flush after every `bytes` written. Zero disables the policy.
    pub fn with_auto_sync(mut self, bytes: u64) -> Self {
        self.sync_every = bytes;
        self
    }

    /// Caps the bytes moved per underlying call.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Installs a callback invoked with the stream position as bytes move.
    pub fn on_progress(mut self, callback: impl FnMut(u64) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Bytes moved through the stream so far.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// The running checksum; zero when checksums are disabled.
    pub fn checksum(&self) -> u64 {
        self.hasher.as_ref().map_or(0, Hasher::value)
    }

    pub fn checksum_enabled(&self) -> bool {
        self.hasher.is_some()
    }

    /// Folds bytes into the checksum without moving them, used when a
    /// trailer must cover bytes produced out of band.
    pub fn update_checksum(&mut self, bytes: &[u8]) {
        if let Some(h) = &mut self.hasher {
            h.update(bytes);
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn after_move(&mut self, moved: &[u8]) {
        if let Some(h) = &mut self.hasher {
            h.update(moved);
        }
        self.pos += moved.len() as u64;
        if let Some(cb) = &mut self.progress {
            cb(self.pos);
        }
    }
}

impl<T: Read> Read for SnapshotIo<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let cap = buf.len().min(self.chunk);
        let n = self.inner.read(&mut buf[..cap])?;
        self.after_move(&buf[..n]);
        Ok(n)
    }
}

impl<T: Write + Syncable> Write for SnapshotIo<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let cap = buf.len().min(self.chunk);
        let n = self.inner.write(&buf[..cap])?;
        self.after_move(&buf[..n]);
        self.since_sync += n as u64;
        if self.sync_every > 0 && self.since_sync >= self.sync_every {
            self.inner.durable_sync()?;
            self.since_sync = 0;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
