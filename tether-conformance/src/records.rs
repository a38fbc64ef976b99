//! The value types the contract marshals.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use tether_proto::coding::{self, BufExt, BufMutExt, Codec};

/// A plain two-field record
///
/// Fields encode in declaration order; round-trip equality is structural.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vertex {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Vertex {
    /// Construct from both fields.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Re-populate `self` from a decoded reply slot.
    ///
    /// Copy-back parameters mutate the caller's original instance in place;
    /// the instance is never replaced.
    pub fn decode_into<B: Buf>(&mut self, buf: &mut B) -> coding::Result<()> {
        self.x = buf.get::<i32>()?;
        self.y = buf.get::<i32>()?;
        Ok(())
    }
}

impl Codec for Vertex {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        let mut v = Self::default();
        v.decode_into(buf)?;
        Ok(v)
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write::<i32>(self.x);
        buf.write::<i32>(self.y);
    }
}

/// Declared alongside [`Vertex`] but with a wire schema of its own; nesting
/// in the declaration does not leak into the encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Depth {
    /// The wrapped value.
    pub z: f32,
}

impl Codec for Depth {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        Ok(Self {
            z: buf.get::<f32>()?,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write::<f32>(self.z);
    }
}

/// An opaque serialized record
///
/// Crosses the boundary type-erased, inside a blob envelope; the wire layer
/// never sees the fields. Combined by a handler-defined reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Accumulated additively.
    pub foo: i32,
    /// Accumulated subtractively.
    pub bar: i32,
    /// Accumulated additively.
    pub baz: i32,
}

impl Tally {
    /// Construct from all three fields.
    pub fn new(foo: i32, bar: i32, baz: i32) -> Self {
        Self { foo, bar, baz }
    }
}

/// An ordered map from `i32` key to boolean
///
/// Keys are unique and kept sorted ascending. Aggregates over the map only
/// count true-valued entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseFlags {
    entries: BTreeMap<i32, bool>,
}

impl SparseFlags {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one entry. Duplicate keys collapse.
    pub fn put(&mut self, key: i32, value: bool) {
        self.entries.insert(key, value);
    }

    /// Number of entries, regardless of value.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.keys().copied()
    }

    /// All entries, ascending by key.
    pub fn iter(&self) -> impl Iterator<Item = (i32, bool)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}

impl Codec for SparseFlags {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        let len = buf.get::<u32>()?;
        let mut flags = Self::new();
        for _ in 0..len {
            let key = buf.get::<i32>()?;
            let value = buf.get::<u8>()? != 0;
            flags.put(key, value);
        }
        Ok(flags)
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write::<u32>(self.entries.len() as u32);
        for (key, value) in self.iter() {
            buf.write::<i32>(key);
            buf.write::<u8>(u8::from(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_fields_keep_declaration_order() {
        let mut buf = Vec::new();
        Vertex::new(5, 12).encode(&mut buf);
        let mut r: &[u8] = &buf;
        assert_eq!(BufExt::get::<i32>(&mut r), Ok(5));
        assert_eq!(BufExt::get::<i32>(&mut r), Ok(12));
    }

    #[test]
    fn copy_back_repopulates_in_place() {
        let mut original = Vertex::new(1, 2);
        let mut buf = Vec::new();
        Vertex::new(7, -9).encode(&mut buf);
        original.decode_into(&mut &buf[..]).unwrap();
        assert_eq!(original, Vertex::new(7, -9));
    }

    #[test]
    fn flags_sort_and_collapse() {
        let mut flags = SparseFlags::new();
        flags.put(20, false);
        flags.put(5, true);
        flags.put(5, true);
        flags.put(190, true);
        assert_eq!(flags.len(), 3);
        assert_eq!(flags.keys().collect::<Vec<_>>(), vec![5, 20, 190]);

        let mut buf = Vec::new();
        flags.encode(&mut buf);
        assert_eq!(SparseFlags::decode(&mut &buf[..]), Ok(flags));
    }
}
