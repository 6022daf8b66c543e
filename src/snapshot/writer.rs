use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::db::{now_ms, Db};
use crate::error::Result;
use crate::snapshot::codec::{self, write_double, write_int_string, write_length, write_string};
use crate::snapshot::io::{SnapshotIo, Syncable};
use crate::value::{Hash, List, Set, Str, Value, Zset};

/// How a snapshot write finished: completely, or stopped early by a
/// cooperative cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Done,
    Cancelled,
}

/// Serializes the databases to the snapshot format: magic, version, per
/// database a select record and its key/value records with expiry prefixes,
/// then the EOF opcode and the CRC64 trailer (zero when checksums are off).
///
/// Keys whose deadline already passed are skipped rather than written. The
/// optional cancel flag is polled between keys; when it trips, the write
/// stops early and reports [`WriteOutcome::Cancelled`], leaving the stream
/// incomplete for the caller to discard.
pub fn write_snapshot<W: Write + Syncable>(
    io: &mut SnapshotIo<W>,
    dbs: &[Db],
    compression: bool,
    cancel: Option<&AtomicBool>,
) -> Result<WriteOutcome> {
    io.write_all(codec::MAGIC)?;
    io.write_all(format!("{:04}", codec::VERSION).as_bytes())?;

    let now = now_ms();
    for (index, db) in dbs.iter().enumerate() {
        if db.is_empty() {
            continue;
        }
        io.write_u8(codec::OP_SELECT_DB)?;
        write_length(io, index as u64)?;

        for (key, value) in db.iter() {
            if let Some(cancel) = cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(WriteOutcome::Cancelled);
                }
            }
            let deadline = db.deadline(key);
            if let Some(at) = deadline {
                if at < now {
                    continue;
                }
                io.write_u8(codec::OP_EXPIRE_MS)?;
                io.write_u64::<LittleEndian>(at as u64)?;
            }
            write_value_type(io, value)?;
            write_string(io, key, compression)?;
            write_value(io, value, compression)?;
        }
    }

    io.write_u8(codec::OP_EOF)?;
    let checksum = io.checksum();
    io.write_u64::<LittleEndian>(checksum)?;
    io.flush()?;
    Ok(WriteOutcome::Done)
}

/// Writes the type opcode identifying the value's format, compact forms
/// included.
fn write_value_type<W: Write + Syncable>(io: &mut SnapshotIo<W>, value: &Value) -> Result<()> {
    let opcode = match value {
        Value::Str(_) => codec::TYPE_STRING,
        Value::List(List::Packed(_)) => codec::TYPE_LIST_PACKED,
        Value::List(List::Linked(_)) => codec::TYPE_LIST,
        Value::Set(Set::Ints(_)) => codec::TYPE_SET_INTARRAY,
        Value::Set(Set::Table(_)) => codec::TYPE_SET,
        Value::Zset(Zset::Packed(_)) => codec::TYPE_ZSET_PACKED,
        Value::Zset(Zset::Skip(_)) => codec::TYPE_ZSET,
        Value::Hash(Hash::Packed(_)) => codec::TYPE_HASH_PACKED,
        Value::Hash(Hash::Table(_)) => codec::TYPE_HASH,
    };
    io.write_u8(opcode)?;
    Ok(())
}

fn write_value<W: Write + Syncable>(
    io: &mut SnapshotIo<W>,
    value: &Value,
    compression: bool,
) -> Result<()> {
    match value {
        Value::Str(Str::Int(v)) => write_int_string(io, *v)?,
        Value::Str(s) => write_string(io, &s.bytes(), compression)?,

        // Compact forms: the whole internal layout as one opaque blob.
        Value::List(List::Packed(p)) => write_string(io, &p.to_bytes(), compression)?,
        Value::Set(Set::Ints(s)) => write_string(io, &s.to_bytes(), compression)?,
        Value::Zset(Zset::Packed(p)) => write_string(io, &p.to_bytes(), compression)?,
        Value::Hash(Hash::Packed(p)) => write_string(io, &p.to_bytes(), compression)?,

        // Natural forms: count, then each element through the string codec.
        Value::List(List::Linked(d)) => {
            write_length(io, d.len() as u64)?;
            for element in d {
                write_string(io, element, compression)?;
            }
        }
        Value::Set(Set::Table(members)) => {
            write_length(io, members.len() as u64)?;
            for (member, _) in members.iter() {
                write_string(io, member, compression)?;
            }
        }
        Value::Zset(Zset::Skip(s)) => {
            write_length(io, s.list.len() as u64)?;
            for (element, &score) in s.scores.iter() {
                write_string(io, element, compression)?;
                write_double(io, score)?;
            }
        }
        Value::Hash(Hash::Table(fields)) => {
            write_length(io, fields.len() as u64)?;
            for (field, field_value) in fields.iter() {
                write_string(io, field, compression)?;
                write_string(io, field_value, compression)?;
            }
        }
    }
    Ok(())
}
