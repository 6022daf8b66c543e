use std::collections::VecDeque;
use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::config::Config;
use crate::db::{now_ms, Db};
use crate::ds::{parse_int, ByteString, Dict, IntSet, PackedList};
use crate::errdata;
use crate::error::Result;
use crate::snapshot::codec::{
    self, read_double, read_plain_length, read_string, CHECKSUM_MIN_VERSION,
};
use crate::snapshot::io::SnapshotIo;
use crate::value::{Hash, List, Set, SkipSet, Str, Value, Zset};

/// Streams a snapshot back into a fresh database array.
///
/// Natural encodings rebuild values under the most compact admissible
/// encoding, promoting mid-stream as elements cross the configured
/// thresholds. Compact encodings validate the blob, stamp the type, then
/// promote in a post-pass when the loaded size already exceeds a threshold.
/// Keys with a lapsed expiry are dropped, unless loading as a replica where
/// the primary's expiry decisions are authoritative.
pub fn read_snapshot<R: Read>(
    io: &mut SnapshotIo<R>,
    config: &Config,
    replica: bool,
) -> Result<Vec<Db>> {
    let mut header = [0u8; 9];
    io.read_exact(&mut header)?;
    if &header[..5] != codec::MAGIC {
        return errdata!("wrong magic, not a snapshot file");
    }
    let version: u32 = std::str::from_utf8(&header[5..])
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| crate::error::Error::InvalidData("malformed version field".into()))?;
    if version == 0 || version > codec::VERSION {
        return errdata!("cannot handle snapshot format version {version}");
    }

    let mut dbs: Vec<Db> = (0..config.db_count).map(|_| Db::new()).collect();
    let mut current = 0;
    let now = now_ms();

    loop {
        let mut opcode = io.read_u8()?;
        let mut deadline: Option<i64> = None;

        if opcode == codec::OP_EXPIRE_SECS {
            deadline = Some(io.read_u32::<LittleEndian>()? as i64 * 1000);
            opcode = io.read_u8()?;
        } else if opcode == codec::OP_EXPIRE_MS {
            deadline = Some(io.read_u64::<LittleEndian>()? as i64);
            opcode = io.read_u8()?;
        }

        if opcode == codec::OP_EOF {
            break;
        }
        if opcode == codec::OP_SELECT_DB {
            let index = read_plain_length(io)? as usize;
            if index >= dbs.len() {
                return errdata!("snapshot selects database {index}, only {} exist", dbs.len());
            }
            current = index;
            continue;
        }

        let key = ByteString::from(read_string(io)?);
        let value = read_value(io, opcode, config)?;

        if let Some(at) = deadline {
            if at < now && !replica {
                continue;
            }
        }
        dbs[current].restore(key, value, deadline);
    }

    if version >= CHECKSUM_MIN_VERSION {
        // The running checksum must be captured before the trailer bytes
        // are consumed.
        let computed = io.checksum();
        let stored = io.read_u64::<LittleEndian>()?;
        if io.checksum_enabled() && stored != 0 && stored != computed {
            return errdata!("checksum mismatch: stored {stored:016x}, computed {computed:016x}");
        }
        if stored == 0 {
            tracing::warn!("snapshot written with checksum disabled, no verification done");
        }
    }

    Ok(dbs)
}

fn read_value<R: Read>(io: &mut SnapshotIo<R>, opcode: u8, config: &Config) -> Result<Value> {
    match opcode {
        codec::TYPE_STRING => Ok(Value::Str(Str::from_bytes(&read_string(io)?))),
        codec::TYPE_LIST => read_list(io, config),
        codec::TYPE_SET => read_set(io, config),
        codec::TYPE_ZSET => read_zset(io, config),
        codec::TYPE_HASH => read_hash(io, config),
        codec::TYPE_LIST_PACKED => {
            let list = PackedList::from_bytes(read_string(io)?)?;
            let mut list = List::Packed(list);
            if list.len() > config.list_max_packed_entries {
                list.convert_to_linked();
            }
            Ok(Value::List(list))
        }
        codec::TYPE_SET_INTARRAY => {
            let ints = IntSet::from_bytes(&read_string(io)?)?;
            let mut set = Set::Ints(ints);
            if set.len() > config.set_max_intset_entries {
                set.convert_to_table(0);
            }
            Ok(Value::Set(set))
        }
        codec::TYPE_ZSET_PACKED => {
            let packed = PackedList::from_bytes(read_string(io)?)?;
            if packed.len() % 2 != 0 {
                return errdata!("packed sorted set holds an odd entry count");
            }
            let mut zset = Zset::Packed(packed);
            if zset.len() > config.zset_max_packed_entries {
                zset.convert_to_skip();
            }
            Ok(Value::Zset(zset))
        }
        codec::TYPE_HASH_PACKED => {
            let packed = PackedList::from_bytes(read_string(io)?)?;
            if packed.len() % 2 != 0 {
                return errdata!("packed hash holds an odd entry count");
            }
            let mut hash = Hash::Packed(packed);
            if hash.len() > config.hash_max_packed_entries {
                hash.convert_to_table();
            }
            Ok(Value::Hash(hash))
        }
        other => errdata!("unknown value type opcode {other}"),
    }
}

fn read_list<R: Read>(io: &mut SnapshotIo<R>, config: &Config) -> Result<Value> {
    let len = read_plain_length(io)? as usize;
    let mut list = if len > config.list_max_packed_entries {
        List::Linked(VecDeque::with_capacity(len))
    } else {
        List::Packed(PackedList::new())
    };
    for _ in 0..len {
        let element = read_string(io)?;
        if matches!(&list, List::Packed(_)) && element.len() > config.list_max_packed_value {
            list.convert_to_linked();
        }
        match &mut list {
            List::Packed(p) => p.push_tail(&element),
            List::Linked(d) => d.push_back(ByteString::from(element)),
        }
    }
    Ok(Value::List(list))
}

fn read_set<R: Read>(io: &mut SnapshotIo<R>, config: &Config) -> Result<Value> {
    let len = read_plain_length(io)? as usize;
    let mut set = if len > config.set_max_intset_entries {
        let mut dict = Dict::new();
        dict.expand(len);
        Set::Table(dict)
    } else {
        Set::Ints(IntSet::new())
    };
    for _ in 0..len {
        let member = read_string(io)?;
        if matches!(&set, Set::Ints(_)) && parse_int(&member).is_none() {
            set.convert_to_table(len);
        }
        match &mut set {
            Set::Ints(is) => {
                is.insert(parse_int(&member).unwrap());
            }
            Set::Table(d) => {
                d.insert(ByteString::from(member), ());
            }
        }
    }
    Ok(Value::Set(set))
}

fn read_zset<R: Read>(io: &mut SnapshotIo<R>, config: &Config) -> Result<Value> {
    let len = read_plain_length(io)? as usize;
    let mut pairs = Vec::with_capacity(len);
    let mut max_element = 0;
    for _ in 0..len {
        let element = read_string(io)?;
        let score = read_double(io)?;
        max_element = max_element.max(element.len());
        pairs.push((element, score));
    }
    // Sorted sets are not stored ordered; pick the encoding after the fact.
    if len <= config.zset_max_packed_entries && max_element <= config.zset_max_packed_value {
        pairs.sort_by(|(ea, sa), (eb, sb)| {
            sa.partial_cmp(sb).unwrap_or(std::cmp::Ordering::Equal).then_with(|| ea.cmp(eb))
        });
        let mut packed = PackedList::new();
        for (element, score) in &pairs {
            packed.push_tail(element);
            packed.push_tail(&crate::value::format_double(*score));
        }
        Ok(Value::Zset(Zset::Packed(packed)))
    } else {
        let mut skip = SkipSet::new();
        skip.scores.expand(len);
        for (element, score) in pairs {
            let element = ByteString::from(element);
            if skip.scores.insert(element.clone(), score).is_none() {
                skip.list.insert(score, element);
            }
        }
        Ok(Value::Zset(Zset::Skip(skip)))
    }
}

fn read_hash<R: Read>(io: &mut SnapshotIo<R>, config: &Config) -> Result<Value> {
    let len = read_plain_length(io)? as usize;
    let mut hash = if len > config.hash_max_packed_entries {
        let mut dict = Dict::new();
        dict.expand(len);
        Hash::Table(dict)
    } else {
        Hash::Packed(PackedList::new())
    };
    for _ in 0..len {
        let field = read_string(io)?;
        let value = read_string(io)?;
        if matches!(&hash, Hash::Packed(_))
            && (field.len() > config.hash_max_packed_value
                || value.len() > config.hash_max_packed_value)
        {
            hash.convert_to_table();
        }
        match &mut hash {
            Hash::Packed(p) => {
                p.push_tail(&field);
                p.push_tail(&value);
            }
            Hash::Table(d) => {
                d.insert(ByteString::from(field), ByteString::from(value));
            }
        }
    }
    Ok(Value::Hash(hash))
}
