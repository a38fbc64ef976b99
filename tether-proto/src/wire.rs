//! Call/reply framing and wire status codes.

use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::{
    coding::{BufExt, BufMutExt},
    DecodeError,
};

/// A wire status code carried by every reply
///
/// `0` is success; any other value is a declared fault and the reply body is
/// its UTF-8 reason string instead of a result payload.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Status(u16);

impl Status {
    /// Whether this status reports a completed call.
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// The raw wire code.
    pub fn code(self) -> u16 {
        self.0
    }
}

macro_rules! statuses {
    {$($name:ident($val:expr) $desc:expr;)*} => {
        #[allow(missing_docs)]
        impl Status {
            $(#[doc = $desc] pub const $name: Self = Self($val);)*
        }

        impl fmt::Debug for Status {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    x => write!(f, "Status({x:04x})"),
                }
            }
        }

        impl fmt::Display for Status {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let x = match self.0 {
                    $($val => $desc,)*
                    _ => "unknown status",
                };
                f.write_str(x)
            }
        }
    }
}

statuses! {
    OK(0x0) "the call completed";
    UNKNOWN_SERVICE(0x1) "no service is registered under the requested name";
    UNKNOWN_OBJECT(0x2) "the target object is not registered at the callee";
    UNKNOWN_METHOD(0x3) "the target object does not implement the method code";
    BAD_ARGUMENTS(0x4) "the argument payload did not decode against any variant of the method";
    CONTRACT_FAULT(0x5) "a precondition of the call contract was broken inside the handler";
    INTERNAL(0x6) "the handler failed for a reason outside the call contract";
}

/// Which side of a frame owns a referenced callback object
///
/// Ownership is relative to the frame: `Sender` means the object lives in the
/// process that encoded the frame. Decoding flips the perspective, so an
/// object that is passed back toward its owner resolves to the original
/// registration rather than to a proxy of a proxy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Owner {
    /// The object lives at the process that encoded this frame.
    Sender,
    /// The object lives at the process that will decode this frame.
    Receiver,
}

/// Wire form of a callback object reference
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WireHandle {
    /// Which side of the carrying frame owns the object.
    pub owner: Owner,
    /// Registry id of the object in its owning process.
    pub id: u64,
}

impl WireHandle {
    /// Append the encoding of `self` to the provided buffer.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write::<u8>(match self.owner {
            Owner::Sender => 0,
            Owner::Receiver => 1,
        });
        buf.write::<u64>(self.id);
    }

    /// Decode a handle from the provided buffer.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let owner = match buf.get::<u8>()? {
            0 => Owner::Sender,
            1 => Owner::Receiver,
            x => return Err(DecodeError::BadOwner(x)),
        };
        Ok(Self {
            owner,
            id: buf.get::<u64>()?,
        })
    }
}

const KIND_CALL: u8 = 0x01;
const KIND_REPLY: u8 = 0x02;
const KIND_CONNECT: u8 = 0x03;

/// One datagram crossing the process boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Invoke `method` on the receiver-registered object `target`.
    Call {
        /// Correlation id chosen by the caller; echoed by the reply.
        corr_id: u64,
        /// Registry id of the target object at the receiver.
        target: u64,
        /// Method code within the target's interface.
        method: u32,
        /// Tagged argument payload.
        args: Bytes,
    },
    /// Answer to a `Call` or `Connect` with the same correlation id.
    Reply {
        /// Correlation id of the call being answered.
        corr_id: u64,
        /// Outcome of the call.
        status: Status,
        /// Result payload on success, UTF-8 reason otherwise.
        body: Bytes,
    },
    /// Resolve the named service to its root object handle.
    Connect {
        /// Correlation id chosen by the caller; echoed by the reply.
        corr_id: u64,
        /// Service name as registered at the receiver.
        name: String,
    },
}

impl Frame {
    /// Append the encoding of `self` to the provided buffer.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Call {
                corr_id,
                target,
                method,
                args,
            } => {
                buf.write::<u8>(KIND_CALL);
                buf.write::<u64>(*corr_id);
                buf.write::<u64>(*target);
                buf.write::<u32>(*method);
                buf.put_slice(args);
            }
            Self::Reply {
                corr_id,
                status,
                body,
            } => {
                buf.write::<u8>(KIND_REPLY);
                buf.write::<u64>(*corr_id);
                buf.write::<u16>(status.code());
                buf.put_slice(body);
            }
            Self::Connect { corr_id, name } => {
                buf.write::<u8>(KIND_CONNECT);
                buf.write::<u64>(*corr_id);
                buf.write::<u32>(name.len() as u32);
                buf.put_slice(name.as_bytes());
            }
        }
    }

    /// Decode a frame from one received datagram.
    ///
    /// The payload after the fixed header is taken verbatim; its interior is
    /// only decoded later, against the signature of the dispatched method.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        let kind = buf.get::<u8>()?;
        let corr_id = buf.get::<u64>()?;
        match kind {
            KIND_CALL => {
                let target = buf.get::<u64>()?;
                let method = buf.get::<u32>()?;
                Ok(Self::Call {
                    corr_id,
                    target,
                    method,
                    args: buf,
                })
            }
            KIND_REPLY => {
                let status = Status(buf.get::<u16>()?);
                Ok(Self::Reply {
                    corr_id,
                    status,
                    body: buf,
                })
            }
            KIND_CONNECT => {
                let len = buf.get::<u32>()? as usize;
                if buf.remaining() < len {
                    return Err(DecodeError::UnexpectedEnd);
                }
                let name = String::from_utf8(buf.copy_to_bytes(len).to_vec())
                    .map_err(|_| DecodeError::BadString)?;
                Ok(Self::Connect { corr_id, name })
            }
            x => Err(DecodeError::UnknownFrameKind(x)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use hex_literal::hex;

    use super::*;
    use crate::tag::Tag;
    use crate::coding::Codec;

    #[test]
    fn call_frame_golden() {
        let mut args = BytesMut::new();
        Tag::I32.encode(&mut args);
        args.write::<i32>(12);
        let frame = Frame::Call {
            corr_id: 1,
            target: 2,
            method: 3,
            args: args.freeze(),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(
            &buf[..],
            &hex!(
                "01"               // CALL
                "0000000000000001" // corr_id
                "0000000000000002" // target
                "00000003"         // method
                "01 0000000c"      // I32 12
            )[..]
        );
        assert_eq!(Frame::decode(buf.freeze()), Ok(frame));
    }

    #[test]
    fn fault_reply_carries_reason() {
        let frame = Frame::Reply {
            corr_id: 9,
            status: Status::CONTRACT_FAULT,
            body: Bytes::from_static(b"Wrong UUID"),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        match Frame::decode(buf.freeze()).unwrap() {
            Frame::Reply { status, body, .. } => {
                assert!(!status.is_ok());
                assert_eq!(&body[..], b"Wrong UUID");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn connect_name_must_be_utf8() {
        let mut buf = BytesMut::new();
        buf.write::<u8>(0x03);
        buf.write::<u64>(7);
        buf.write::<u32>(2);
        buf.put_slice(&[0xff, 0xfe]);
        assert_eq!(Frame::decode(buf.freeze()), Err(DecodeError::BadString));
    }

    #[test]
    fn unknown_kind_rejected() {
        let buf = Bytes::from_static(&hex!("7f 0000000000000001"));
        assert_eq!(Frame::decode(buf), Err(DecodeError::UnknownFrameKind(0x7f)));
    }

    #[test]
    fn handle_owner_flips_nothing_on_the_wire() {
        let handle = WireHandle {
            owner: Owner::Receiver,
            id: 42,
        };
        let mut buf = BytesMut::new();
        handle.encode(&mut buf);
        assert_eq!(&buf[..], &hex!("01 000000000000002a")[..]);
        let mut r = buf.freeze();
        assert_eq!(WireHandle::decode(&mut r), Ok(handle));
    }
}
