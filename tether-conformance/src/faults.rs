//! The fault-propagation service.
//!
//! Two operations with identical handler bodies and deliberately different
//! failure surfaces. An absent argument to [`FaultsProxy::deref_null_in_client`]
//! is dereferenced locally and raises a validation error before any frame is
//! sent. The same absent argument to [`FaultsProxy::deref_null_in_server`]
//! faults inside the handler, where the contract swallows it: the call
//! returns as if it had succeeded. The swallow is intentional behavior to be
//! reproduced, not a bug to fix.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use tether::{CallError, Dispatch, Endpoint, Fault, RemoteObject};
use tether_proto::{coding::Codec, slot, DecodeError, Tag};

/// Name the service is registered under.
pub const SERVICE: &str = "faults";

/// Write into slot 0; an absent array is the caller's own error.
pub const DEREF_NULL_IN_CLIENT: u32 = 1;
/// Write into slot 0; an absent array faults the handler, silently.
pub const DEREF_NULL_IN_SERVER: u32 = 2;

/// Caller half of the service
#[derive(Debug, Clone)]
pub struct FaultsProxy {
    object: RemoteObject,
}

impl FaultsProxy {
    /// Wrap the root object resolved by a connect.
    pub fn new(object: RemoteObject) -> Self {
        Self { object }
    }

    /// The required slot array is dereferenced here, in the calling process,
    /// while marshaling; absence surfaces before any call is attempted.
    pub fn deref_null_in_client(&self, slots: Option<&mut Vec<i32>>) -> Result<(), CallError> {
        let slots = slots.ok_or(CallError::Validation(
            "deref_null_in_client requires a slot array",
        ))?;
        let mut args = BytesMut::new();
        slot::write_i32_array(slots, &mut args);
        let mut reply = self.object.call(DEREF_NULL_IN_CLIENT, args.freeze())?;
        *slots = slot::read_i32_array(&mut reply)?;
        Ok(())
    }

    /// An absent array is marshaled as the distinguished absent marker and
    /// becomes the handler's problem; the caller sees a normal return.
    pub fn deref_null_in_server(&self, slots: Option<&mut Vec<i32>>) -> Result<(), CallError> {
        let mut args = BytesMut::new();
        match &slots {
            None => Tag::NULL.encode(&mut args),
            Some(slots) => slot::write_i32_array(slots, &mut args),
        }
        let mut reply = self.object.call(DEREF_NULL_IN_SERVER, args.freeze())?;
        let tag = Tag::decode(&mut reply).map_err(DecodeError::from)?;
        if tag == Tag::ARRAY {
            Tag::expect(&mut reply, Tag::I32)?;
            let values = slot::read_i32_seq(&mut reply)?;
            if let Some(slots) = slots {
                *slots = values;
            }
        }
        Ok(())
    }
}

/// Server half; stateless
pub struct FaultsService;

impl Dispatch for FaultsService {
    fn dispatch(
        &self,
        _endpoint: &Endpoint,
        method: u32,
        mut args: Bytes,
        reply: &mut BytesMut,
    ) -> Result<(), Fault> {
        match method {
            DEREF_NULL_IN_CLIENT | DEREF_NULL_IN_SERVER => {
                let tag = Tag::decode(&mut args).map_err(DecodeError::from)?;
                let mut slots = match tag {
                    Tag::NULL => None,
                    Tag::ARRAY => {
                        Tag::expect(&mut args, Tag::I32)?;
                        Some(slot::read_i32_seq(&mut args)?)
                    }
                    found => {
                        return Err(DecodeError::UnexpectedTag {
                            expected: Tag::ARRAY,
                            found,
                        }
                        .into())
                    }
                };
                if let Err(reason) = write_first(&mut slots) {
                    // Not a declared fault of the contract: the caller must
                    // observe a normal return.
                    warn!(method, reason, "suppressing handler fault");
                }
                match &slots {
                    None => Tag::NULL.encode(reply),
                    Some(slots) => slot::write_i32_array(slots, reply),
                }
                Ok(())
            }
            other => Err(Fault::unknown_method(other)),
        }
    }
}

fn write_first(slots: &mut Option<Vec<i32>>) -> Result<(), &'static str> {
    let slots = slots.as_mut().ok_or("slot array is absent")?;
    let first = slots.first_mut().ok_or("slot array is empty")?;
    *first = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_first_hits_slot_zero() {
        let mut slots = Some(vec![7, 8]);
        write_first(&mut slots).unwrap();
        assert_eq!(slots, Some(vec![0, 8]));
    }

    #[test]
    fn absent_and_empty_arrays_fault() {
        assert!(write_first(&mut None).is_err());
        assert!(write_first(&mut Some(Vec::new())).is_err());
    }
}
