use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

use crate::error::Result;
use crate::errdata;

/// An ordered, de-duplicated set of integers stored at the narrowest element
/// width that fits every member. Width only ever grows: inserting a value out
/// of the current range re-encodes the whole array first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntSet {
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

fn width_for(v: i64) -> u8 {
    if i16::try_from(v).is_ok() {
        2
    } else if i32::try_from(v).is_ok() {
        4
    } else {
        8
    }
}

fn insert_sorted<T: Ord + Copy>(els: &mut Vec<T>, v: T) -> bool {
    match els.binary_search(&v) {
        Ok(_) => false,
        Err(pos) => {
            els.insert(pos, v);
            true
        }
    }
}

fn remove_sorted<T: Ord + Copy>(els: &mut Vec<T>, v: T) -> bool {
    match els.binary_search(&v) {
        Ok(pos) => {
            els.remove(pos);
            true
        }
        Err(_) => false,
    }
}

impl IntSet {
    pub fn new() -> Self {
        IntSet::I16(Vec::new())
    }

    /// Element width in bytes: 2, 4, or 8.
    pub fn width(&self) -> u8 {
        match self {
            IntSet::I16(_) => 2,
            IntSet::I32(_) => 4,
            IntSet::I64(_) => 8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IntSet::I16(els) => els.len(),
            IntSet::I32(els) => els.len(),
            IntSet::I64(els) => els.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, v: i64) -> bool {
        match self {
            IntSet::I16(els) => i16::try_from(v).map_or(false, |v| els.binary_search(&v).is_ok()),
            IntSet::I32(els) => i32::try_from(v).map_or(false, |v| els.binary_search(&v).is_ok()),
            IntSet::I64(els) => els.binary_search(&v).is_ok(),
        }
    }

    /// Inserts a value, reporting whether it was newly added. Re-encodes the
    /// array at a wider width first when the value exceeds the current range.
    pub fn insert(&mut self, v: i64) -> bool {
        if width_for(v) > self.width() {
            self.upgrade(width_for(v));
        }
        match self {
            IntSet::I16(els) => insert_sorted(els, v as i16),
            IntSet::I32(els) => insert_sorted(els, v as i32),
            IntSet::I64(els) => insert_sorted(els, v),
        }
    }

    /// Removes a value, reporting whether it was present. The element width
    /// is left as-is.
    pub fn remove(&mut self, v: i64) -> bool {
        match self {
            IntSet::I16(els) => i16::try_from(v).map_or(false, |v| remove_sorted(els, v)),
            IntSet::I32(els) => i32::try_from(v).map_or(false, |v| remove_sorted(els, v)),
            IntSet::I64(els) => remove_sorted(els, v),
        }
    }

    /// Returns the element at the given rank in ascending order.
    pub fn get(&self, index: usize) -> Option<i64> {
        match self {
            IntSet::I16(els) => els.get(index).map(|&v| v as i64),
            IntSet::I32(els) => els.get(index).map(|&v| v as i64),
            IntSet::I64(els) => els.get(index).copied(),
        }
    }

    pub fn random<R: Rng>(&self, rng: &mut R) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        self.get(rng.gen_range(0..self.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(move |i| self.get(i).unwrap())
    }

    fn upgrade(&mut self, width: u8) {
        let els: Vec<i64> = self.iter().collect();
        *self = match width {
            4 => IntSet::I32(els.into_iter().map(|v| v as i32).collect()),
            _ => IntSet::I64(els),
        };
    }

    /// Serializes to the blob layout used by the snapshot compact form:
    /// element width u32 LE, count u32 LE, then elements little-endian at
    /// that width.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.len() * self.width() as usize);
        out.write_u32::<LittleEndian>(self.width() as u32).unwrap();
        out.write_u32::<LittleEndian>(self.len() as u32).unwrap();
        match self {
            IntSet::I16(els) => {
                for &v in els {
                    out.write_i16::<LittleEndian>(v).unwrap();
                }
            }
            IntSet::I32(els) => {
                for &v in els {
                    out.write_i32::<LittleEndian>(v).unwrap();
                }
            }
            IntSet::I64(els) => {
                for &v in els {
                    out.write_i64::<LittleEndian>(v).unwrap();
                }
            }
        }
        out
    }

    /// Deserializes a blob, validating the header, payload size, and the
    /// strictly-ascending element order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let width = cursor.read_u32::<LittleEndian>().map_err(|_| short(bytes))?;
        let len = cursor.read_u32::<LittleEndian>().map_err(|_| short(bytes))? as usize;
        let payload = bytes.len() - 8;
        if payload != len * width as usize {
            return errdata!("integer set payload is {payload} bytes, header says {len} x {width}");
        }
        let set = match width {
            2 => {
                let mut els = Vec::with_capacity(len);
                for _ in 0..len {
                    els.push(cursor.read_i16::<LittleEndian>().map_err(|_| short(bytes))?);
                }
                IntSet::I16(els)
            }
            4 => {
                let mut els = Vec::with_capacity(len);
                for _ in 0..len {
                    els.push(cursor.read_i32::<LittleEndian>().map_err(|_| short(bytes))?);
                }
                IntSet::I32(els)
            }
            8 => {
                let mut els = Vec::with_capacity(len);
                for _ in 0..len {
                    els.push(cursor.read_i64::<LittleEndian>().map_err(|_| short(bytes))?);
                }
                IntSet::I64(els)
            }
            other => return errdata!("unknown integer set width {other}"),
        };
        let ascending = (1..set.len()).all(|i| set.get(i - 1) < set.get(i));
        if !ascending {
            return errdata!("integer set elements are not strictly ascending");
        }
        Ok(set)
    }
}

fn short(bytes: &[u8]) -> crate::error::Error {
    crate::error::Error::InvalidData(format!("integer set blob too short: {} bytes", bytes.len()))
}

impl Default for IntSet {
    fn default() -> Self {
        Self::new()
    }
}
