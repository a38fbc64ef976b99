//! Argument type tags.
//!
//! Every top-level argument and return slot is preceded by one of these tags.
//! Overloaded operations share a single method code; the callee resolves the
//! variant from the tag sequence of the arguments, never from position alone.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::{
    coding::{self, BufExt, Codec},
    DecodeError,
};

/// A one-byte wire type tag
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Tag(u8);

macro_rules! tags {
    {$($name:ident = $val:expr,)*} => {
        #[allow(missing_docs)]
        impl Tag {
            $(pub const $name: Self = Self($val);)*
        }

        impl fmt::Debug for Tag {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    x => write!(f, "Tag({x:02x})"),
                }
            }
        }
    }
}

tags! {
    NULL = 0x00,
    I32 = 0x01,
    F32 = 0x02,
    RECORD = 0x03,
    BLOB = 0x04,
    FLAGS = 0x05,
    UUID = 0x06,
    HANDLE = 0x07,
    ARRAY = 0x08,
}

impl Tag {
    /// Read a tag and require it to be `want`.
    pub fn expect<B: Buf>(buf: &mut B, want: Self) -> Result<(), DecodeError> {
        let found = buf.get::<Self>()?;
        if found == want {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedTag {
                expected: want,
                found,
            })
        }
    }
}

impl Codec for Tag {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        Ok(Self(buf.get::<u8>()?))
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_names() {
        assert_eq!(format!("{:?}", Tag::FLAGS), "FLAGS");
        assert_eq!(format!("{:?}", Tag(0x7f)), "Tag(7f)");
    }

    #[test]
    fn expect_mismatch() {
        let mut buf: &[u8] = &[0x01];
        assert_eq!(
            Tag::expect(&mut buf, Tag::F32),
            Err(DecodeError::UnexpectedTag {
                expected: Tag::F32,
                found: Tag::I32,
            })
        );
    }
}
