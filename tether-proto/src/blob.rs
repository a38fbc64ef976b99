//! Opaque serialized records.
//!
//! Some values are type-erased at the call boundary: the wire layer carries a
//! length-prefixed blob and never inspects the interior. Both sides must agree
//! on the interior type out of band; a mismatch is a decode error at the
//! callee, not a wire error.

use bytes::{Buf, BufMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    coding::{BufExt, BufMutExt},
    DecodeError,
};

/// The value could not be serialized into a blob.
#[derive(Debug, Error)]
#[error("value does not fit the blob envelope: {0}")]
pub struct EncodeError(#[from] bincode::Error);

/// Serialize `value` and append it as a length-prefixed blob.
pub fn write<T: Serialize, B: BufMut>(value: &T, buf: &mut B) -> Result<(), EncodeError> {
    let interior = bincode::serialize(value)?;
    buf.write::<u32>(interior.len() as u32);
    buf.put_slice(&interior);
    Ok(())
}

/// Decode a length-prefixed blob and deserialize its interior as `T`.
pub fn read<T: DeserializeOwned, B: Buf>(buf: &mut B) -> Result<T, DecodeError> {
    let len = buf.get::<u32>()? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEnd);
    }
    let interior = buf.copy_to_bytes(len);
    bincode::deserialize(&interior).map_err(|e| DecodeError::Blob(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[test]
    fn interior_is_opaque_but_recoverable() {
        let v = Sample {
            a: -3,
            b: "blob".into(),
        };
        let mut buf = Vec::new();
        write(&v, &mut buf).unwrap();
        let mut r: &[u8] = &buf;
        assert_eq!(read::<Sample, _>(&mut r).unwrap(), v);
    }

    #[test]
    fn truncated_blob_is_a_decode_error() {
        let mut buf = Vec::new();
        write(&7u64, &mut buf).unwrap();
        let mut r: &[u8] = &buf[..buf.len() - 1];
        assert_eq!(read::<u64, _>(&mut r), Err(DecodeError::UnexpectedEnd));
    }
}
