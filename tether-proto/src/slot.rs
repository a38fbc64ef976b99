//! Nullable slot and sequence conventions.
//!
//! Sequences are a `u32` element count followed by the element encodings.
//! An absent element inside a sequence is a zero length marker; any present
//! element begins with its nonzero fixed length, so the absent marker can
//! never alias a valid element. 128-bit ids encode as marker `16` followed by
//! the two big-endian `u64` halves.

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::{
    coding::{BufExt, BufMutExt, Codec},
    tag::Tag,
    DecodeError,
};

const ID_LEN: u8 = 16;

/// Append an optional 128-bit id to the buffer.
pub fn write_id<B: BufMut>(id: Option<Uuid>, buf: &mut B) {
    match id {
        None => buf.write::<u8>(0),
        Some(id) => {
            let (hi, lo) = id.as_u64_pair();
            buf.write::<u8>(ID_LEN);
            buf.write::<u64>(hi);
            buf.write::<u64>(lo);
        }
    }
}

/// Decode an optional 128-bit id from the buffer.
pub fn read_id<B: Buf>(buf: &mut B) -> Result<Option<Uuid>, DecodeError> {
    match buf.get::<u8>()? {
        0 => Ok(None),
        ID_LEN => {
            let hi = buf.get::<u64>()?;
            let lo = buf.get::<u64>()?;
            Ok(Some(Uuid::from_u64_pair(hi, lo)))
        }
        x => Err(DecodeError::BadSlotLength(x)),
    }
}

/// Append a sequence of optional ids to the buffer.
pub fn write_id_seq<B: BufMut>(ids: &[Option<Uuid>], buf: &mut B) {
    buf.write::<u32>(ids.len() as u32);
    for id in ids {
        write_id(*id, buf);
    }
}

/// Decode a sequence of optional ids from the buffer.
pub fn read_id_seq<B: Buf>(buf: &mut B) -> Result<Vec<Option<Uuid>>, DecodeError> {
    let len = buf.get::<u32>()? as usize;
    let mut ids = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        ids.push(read_id(buf)?);
    }
    Ok(ids)
}

/// Append a sequence of 32-bit integers to the buffer.
pub fn write_i32_seq<B: BufMut>(values: &[i32], buf: &mut B) {
    buf.write::<u32>(values.len() as u32);
    for v in values {
        buf.write::<i32>(*v);
    }
}

/// Decode a sequence of 32-bit integers from the buffer.
pub fn read_i32_seq<B: Buf>(buf: &mut B) -> Result<Vec<i32>, DecodeError> {
    let len = buf.get::<u32>()? as usize;
    let mut values = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        values.push(buf.get::<i32>()?);
    }
    Ok(values)
}

/// Append a fully tagged integer array argument (`ARRAY` + `I32` + sequence).
pub fn write_i32_array<B: BufMut>(values: &[i32], buf: &mut B) {
    Tag::ARRAY.encode(buf);
    Tag::I32.encode(buf);
    write_i32_seq(values, buf);
}

/// Decode a fully tagged integer array argument.
pub fn read_i32_array<B: Buf>(buf: &mut B) -> Result<Vec<i32>, DecodeError> {
    Tag::expect(buf, Tag::ARRAY)?;
    Tag::expect(buf, Tag::I32)?;
    read_i32_seq(buf)
}

/// Append a fully tagged id array argument (`ARRAY` + `UUID` + sequence).
pub fn write_id_array<B: BufMut>(ids: &[Option<Uuid>], buf: &mut B) {
    Tag::ARRAY.encode(buf);
    Tag::UUID.encode(buf);
    write_id_seq(ids, buf);
}

/// Decode a fully tagged id array argument.
pub fn read_id_array<B: Buf>(buf: &mut B) -> Result<Vec<Option<Uuid>>, DecodeError> {
    Tag::expect(buf, Tag::ARRAY)?;
    Tag::expect(buf, Tag::UUID)?;
    read_id_seq(buf)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn id_slot_golden() {
        let mut buf = Vec::new();
        write_id(Some(Uuid::from_u64_pair(1, 2)), &mut buf);
        write_id(None, &mut buf);
        assert_eq!(
            &buf[..],
            &hex!("10 0000000000000001 0000000000000002" "00")[..]
        );
        let mut r: &[u8] = &buf;
        assert_eq!(read_id(&mut r).unwrap(), Some(Uuid::from_u64_pair(1, 2)));
        assert_eq!(read_id(&mut r).unwrap(), None);
    }

    #[test]
    fn absence_survives_a_sequence() {
        let ids = vec![None, Some(Uuid::from_u64_pair(9876, 5432)), None];
        let mut buf = Vec::new();
        write_id_seq(&ids, &mut buf);
        let mut r: &[u8] = &buf;
        assert_eq!(read_id_seq(&mut r).unwrap(), ids);
    }

    #[test]
    fn partial_marker_rejected() {
        let mut r: &[u8] = &hex!("0f");
        assert_eq!(read_id(&mut r), Err(DecodeError::BadSlotLength(0x0f)));
    }
}
