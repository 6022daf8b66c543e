//! The snapshot subsystem: the byte-exact on-disk format, the chunked
//! checksumming I/O layer it is written through, and the streaming writer
//! and loader.

pub mod codec;
pub mod io;
pub mod reader;
pub mod writer;

pub use io::{SnapshotIo, Syncable};
pub use reader::read_snapshot;
pub use writer::{write_snapshot, WriteOutcome};
