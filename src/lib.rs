//! CinderDB: the storage core of an in-memory key-value database server.
//!
//! A [`Server`] holds numbered logical databases mapping binary-safe keys to
//! typed values (string, list, set, sorted set, hash). Values live under
//! adaptive encodings picked by size thresholds and promoted one-way as they
//! grow. The whole dataset can be saved to a compact self-describing binary
//! snapshot, in the foreground or from a background worker that owns a
//! point-in-time copy, and restored later.

pub mod config;
pub mod db;
pub mod ds;
pub mod error;
pub mod format;
pub mod hasher;
pub mod mem;
pub mod ops;
pub mod server;
pub mod snapshot;
pub mod value;

pub use config::Config;
pub use db::Db;
pub use error::{Error, Result};
pub use ops::list::InsertWhere;
pub use ops::zset::ScoreRange;
pub use server::{SaveResult, Server};
pub use value::{Encoding, Value};
