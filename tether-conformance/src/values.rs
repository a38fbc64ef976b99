//! The value-marshaling service.
//!
//! One operation per value kind the contract covers: records with copy-back,
//! sorted flag maps, opaque blobs, nullable id slots, tag-disambiguated
//! overloads and callback sequences. The service owns a [`SparseFlags`] store
//! that only the primary dispatch queue may touch; register it with
//! [`DispatchPolicy::Primary`].

use parking_lot::Mutex;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use tether::{Affinity, CallError, Dispatch, DispatchPolicy, Endpoint, Fault, RemoteObject};
use tether_proto::{
    blob,
    coding::{BufExt, BufMutExt, Codec},
    slot, DecodeError, Tag,
};

use crate::{
    compute::{self, ComputeHandle},
    records::{Depth, SparseFlags, Tally, Vertex},
};

/// Name the service is registered under.
pub const SERVICE: &str = "values";

/// Sum the keys of the true-valued entries of a flag map.
pub const SUM_KEYS: u32 = 1;
/// Append values into the store; primary queue only.
pub const STORE_VALUES: u32 = 2;
/// Extract the stored keys and their count; primary queue only.
pub const EXTRACT_VALUES: u32 = 3;
/// Tag-disambiguated overload: integers add, floats multiply.
pub const SIMPLE_SEND_RECEIVE: u32 = 4;
/// Swap both records' fields in place, observed via copy-back.
pub const SWAP_XY: u32 = 5;
/// Invoke every handle with (6, 9), preserving order.
pub const COMPUTE_RESULTS: u32 = 6;
/// Append two server-resident callbacks to the caller's sequence.
pub const POPULATE_CLIENTS: u32 = 7;
/// Fold a blob sequence into one record.
pub const COMBINE_SERIALIZABLES: u32 = 8;
/// Wrap a float into the nested record type.
pub const CREATE_INNER: u32 = 9;
/// Tag-disambiguated overload over id slots; slot 2 must be absent.
pub const EXCHANGE_UUIDS: u32 = 10;

/// Caller half of the service
#[derive(Debug, Clone)]
pub struct ValuesProxy {
    object: RemoteObject,
}

impl ValuesProxy {
    /// Wrap the root object resolved by a connect.
    pub fn new(object: RemoteObject) -> Self {
        Self { object }
    }

    fn endpoint(&self) -> &Endpoint {
        self.object.endpoint()
    }

    /// Sum of the keys whose flag is true.
    pub fn sum_keys(&self, flags: &SparseFlags) -> Result<i32, CallError> {
        let mut args = BytesMut::new();
        Tag::FLAGS.encode(&mut args);
        flags.encode(&mut args);
        let mut reply = self.object.call(SUM_KEYS, args.freeze())?;
        Tag::expect(&mut reply, Tag::I32)?;
        Ok(reply.get::<i32>().map_err(DecodeError::from)?)
    }

    /// Append `values` as true-valued entries into the server store.
    pub fn store_values_in_main_thread(&self, values: &[i32]) -> Result<(), CallError> {
        let mut args = BytesMut::new();
        slot::write_i32_array(values, &mut args);
        self.object.call(STORE_VALUES, args.freeze())?;
        Ok(())
    }

    /// Sorted, de-duplicated stored keys; the count comes back through the
    /// caller-owned out-slot.
    pub fn extract_values_in_main_thread(
        &self,
        count: &mut [i32; 1],
    ) -> Result<Vec<i32>, CallError> {
        let mut args = BytesMut::new();
        slot::write_i32_array(&count[..], &mut args);
        let mut reply = self.object.call(EXTRACT_VALUES, args.freeze())?;
        let keys = slot::read_i32_array(&mut reply)?;
        let out = slot::read_i32_array(&mut reply)?;
        count[0] = *out.first().ok_or(DecodeError::UnexpectedEnd)?;
        Ok(keys)
    }

    /// Integer overload: the callee adds.
    pub fn simple_send_receive(&self, x: i32, y: i32) -> Result<i32, CallError> {
        let mut args = BytesMut::new();
        Tag::I32.encode(&mut args);
        args.write::<i32>(x);
        Tag::I32.encode(&mut args);
        args.write::<i32>(y);
        let mut reply = self.object.call(SIMPLE_SEND_RECEIVE, args.freeze())?;
        Tag::expect(&mut reply, Tag::I32)?;
        Ok(reply.get::<i32>().map_err(DecodeError::from)?)
    }

    /// Float overload: the callee multiplies. Same method code; the argument
    /// tags pick the variant.
    pub fn simple_send_receive_f(&self, x: f32, y: f32) -> Result<f32, CallError> {
        let mut args = BytesMut::new();
        Tag::F32.encode(&mut args);
        args.write::<f32>(x);
        Tag::F32.encode(&mut args);
        args.write::<f32>(y);
        let mut reply = self.object.call(SIMPLE_SEND_RECEIVE, args.freeze())?;
        Tag::expect(&mut reply, Tag::F32)?;
        Ok(reply.get::<f32>().map_err(DecodeError::from)?)
    }

    /// Swap x/y of both records. The callee's mutations land back in the
    /// caller's own instances before this returns.
    pub fn swap_xy(&self, a: &mut Vertex, b: &mut Vertex) -> Result<(), CallError> {
        let mut args = BytesMut::new();
        Tag::RECORD.encode(&mut args);
        a.encode(&mut args);
        Tag::RECORD.encode(&mut args);
        b.encode(&mut args);
        let mut reply = self.object.call(SWAP_XY, args.freeze())?;
        Tag::expect(&mut reply, Tag::RECORD)?;
        a.decode_into(&mut reply).map_err(DecodeError::from)?;
        Tag::expect(&mut reply, Tag::RECORD)?;
        b.decode_into(&mut reply).map_err(DecodeError::from)?;
        Ok(())
    }

    /// Have the server invoke every handle with (6, 9).
    pub fn compute_results(&self, handles: &[ComputeHandle]) -> Result<Vec<i32>, CallError> {
        let mut args = BytesMut::new();
        compute::write_handle_seq(self.endpoint(), handles, &mut args);
        let mut reply = self.object.call(COMPUTE_RESULTS, args.freeze())?;
        Ok(slot::read_i32_array(&mut reply)?)
    }

    /// Let the server append its own callback implementations to `clients`.
    pub fn populate_clients(&self, clients: &mut Vec<ComputeHandle>) -> Result<(), CallError> {
        let mut args = BytesMut::new();
        compute::write_handle_seq(self.endpoint(), clients, &mut args);
        let mut reply = self.object.call(POPULATE_CLIENTS, args.freeze())?;
        *clients = compute::read_handle_seq(self.endpoint(), &mut reply).map_err(CallError::from)?;
        Ok(())
    }

    /// Fold the records: `foo` and `baz` sum, `bar` accumulates negated.
    pub fn combine_serializables(&self, tallies: &[Tally]) -> Result<Tally, CallError> {
        let mut args = BytesMut::new();
        Tag::ARRAY.encode(&mut args);
        Tag::BLOB.encode(&mut args);
        args.write::<u32>(tallies.len() as u32);
        for tally in tallies {
            blob::write(tally, &mut args)
                .map_err(|_| CallError::Validation("unserializable record argument"))?;
        }
        let mut reply = self.object.call(COMBINE_SERIALIZABLES, args.freeze())?;
        Tag::expect(&mut reply, Tag::BLOB)?;
        Ok(blob::read(&mut reply)?)
    }

    /// Construct the nested record server-side.
    pub fn create_inner_parcelable(&self, z: f32) -> Result<Depth, CallError> {
        let mut args = BytesMut::new();
        Tag::F32.encode(&mut args);
        args.write::<f32>(z);
        let mut reply = self.object.call(CREATE_INNER, args.freeze())?;
        Tag::expect(&mut reply, Tag::RECORD)?;
        Ok(Depth::decode(&mut reply).map_err(DecodeError::from)?)
    }

    /// Array overload. Precondition: `slots[2]` is absent. Returns the prior
    /// `slots[0]`; the slots shift per the contract, observed via copy-back.
    /// On a declared fault the caller's slots are left untouched.
    pub fn exchange_uuids(
        &self,
        single: Option<Uuid>,
        slots: &mut Vec<Option<Uuid>>,
    ) -> Result<Option<Uuid>, CallError> {
        let mut args = BytesMut::new();
        Tag::UUID.encode(&mut args);
        slot::write_id(single, &mut args);
        slot::write_id_array(slots, &mut args);
        let mut reply = self.object.call(EXCHANGE_UUIDS, args.freeze())?;
        Tag::expect(&mut reply, Tag::UUID)?;
        let ret = slot::read_id(&mut reply)?;
        *slots = slot::read_id_array(&mut reply)?;
        Ok(ret)
    }

    /// Sequence overload: same method code, same precondition on element 2,
    /// returns the first two elements and drops the sentinel.
    pub fn exchange_uuids_seq(
        &self,
        ids: &[Option<Uuid>],
    ) -> Result<Vec<Option<Uuid>>, CallError> {
        let mut args = BytesMut::new();
        slot::write_id_array(ids, &mut args);
        let mut reply = self.object.call(EXCHANGE_UUIDS, args.freeze())?;
        Ok(slot::read_id_array(&mut reply)?)
    }
}

/// Server-side state and handlers
pub struct ValuesService {
    affinity: Affinity,
    // Written only from the primary dispatch queue; the affinity check is the
    // guard, the mutex only satisfies `Sync`.
    store: Mutex<SparseFlags>,
}

impl ValuesService {
    /// Build the service around the owning endpoint's affinity token.
    pub fn new(affinity: Affinity) -> Self {
        Self {
            affinity,
            store: Mutex::new(SparseFlags::new()),
        }
    }

    fn check_affinity(&self, operation: &str) -> Result<(), Fault> {
        if self.affinity.is_current() {
            Ok(())
        } else {
            Err(Fault::contract(format!(
                "{operation} called outside the primary dispatch queue"
            )))
        }
    }
}

impl Dispatch for ValuesService {
    fn dispatch(
        &self,
        endpoint: &Endpoint,
        method: u32,
        mut args: Bytes,
        reply: &mut BytesMut,
    ) -> Result<(), Fault> {
        match method {
            SUM_KEYS => {
                Tag::expect(&mut args, Tag::FLAGS)?;
                let flags = SparseFlags::decode(&mut args).map_err(DecodeError::from)?;
                let sum: i32 = flags.iter().filter(|(_, v)| *v).map(|(k, _)| k).sum();
                Tag::I32.encode(reply);
                reply.write::<i32>(sum);
                Ok(())
            }
            STORE_VALUES => {
                self.check_affinity("store_values_in_main_thread")?;
                let values = slot::read_i32_array(&mut args)?;
                let mut store = self.store.lock();
                for value in values {
                    store.put(value, true);
                }
                Ok(())
            }
            EXTRACT_VALUES => {
                self.check_affinity("extract_values_in_main_thread")?;
                let _in_count = slot::read_i32_array(&mut args)?;
                let keys: Vec<i32> = self.store.lock().keys().collect();
                slot::write_i32_array(&keys, reply);
                slot::write_i32_array(&[keys.len() as i32], reply);
                Ok(())
            }
            SIMPLE_SEND_RECEIVE => {
                let tag = Tag::decode(&mut args).map_err(DecodeError::from)?;
                match tag {
                    Tag::I32 => {
                        let x = args.get::<i32>().map_err(DecodeError::from)?;
                        Tag::expect(&mut args, Tag::I32)?;
                        let y = args.get::<i32>().map_err(DecodeError::from)?;
                        Tag::I32.encode(reply);
                        reply.write::<i32>(x + y);
                        Ok(())
                    }
                    Tag::F32 => {
                        let x = args.get::<f32>().map_err(DecodeError::from)?;
                        Tag::expect(&mut args, Tag::F32)?;
                        let y = args.get::<f32>().map_err(DecodeError::from)?;
                        Tag::F32.encode(reply);
                        reply.write::<f32>(x * y);
                        Ok(())
                    }
                    other => Err(Fault::bad_arguments(format!(
                        "simple_send_receive has no variant for {other:?}"
                    ))),
                }
            }
            SWAP_XY => {
                Tag::expect(&mut args, Tag::RECORD)?;
                let a = Vertex::decode(&mut args).map_err(DecodeError::from)?;
                Tag::expect(&mut args, Tag::RECORD)?;
                let b = Vertex::decode(&mut args).map_err(DecodeError::from)?;
                Tag::RECORD.encode(reply);
                Vertex::new(a.y, a.x).encode(reply);
                Tag::RECORD.encode(reply);
                Vertex::new(b.y, b.x).encode(reply);
                Ok(())
            }
            COMPUTE_RESULTS => {
                let handles = compute::read_handle_seq(endpoint, &mut args)?;
                let mut results = Vec::with_capacity(handles.len());
                for handle in &handles {
                    // Re-enters the caller's process synchronously.
                    results.push(handle.compute(6, 9)?);
                }
                slot::write_i32_array(&results, reply);
                Ok(())
            }
            POPULATE_CLIENTS => {
                let mut handles = compute::read_handle_seq(endpoint, &mut args)?;
                handles.push(ComputeHandle::from_fn(|x, y| x * x + y * y));
                handles.push(ComputeHandle::from_fn(|x, y| x * x - y * y));
                compute::write_handle_seq(endpoint, &handles, reply);
                Ok(())
            }
            COMBINE_SERIALIZABLES => {
                Tag::expect(&mut args, Tag::ARRAY)?;
                Tag::expect(&mut args, Tag::BLOB)?;
                let len = args.get::<u32>().map_err(DecodeError::from)?;
                let mut result = Tally::new(0, 0, 0);
                for _ in 0..len {
                    let tally: Tally = blob::read(&mut args)?;
                    result.foo += tally.foo;
                    result.bar -= tally.bar;
                    result.baz += tally.baz;
                }
                Tag::BLOB.encode(reply);
                blob::write(&result, reply).map_err(|e| Fault {
                    status: tether_proto::Status::INTERNAL,
                    reason: e.to_string(),
                })?;
                Ok(())
            }
            CREATE_INNER => {
                Tag::expect(&mut args, Tag::F32)?;
                let z = args.get::<f32>().map_err(DecodeError::from)?;
                Tag::RECORD.encode(reply);
                Depth { z }.encode(reply);
                Ok(())
            }
            EXCHANGE_UUIDS => {
                let tag = Tag::decode(&mut args).map_err(DecodeError::from)?;
                match tag {
                    Tag::UUID => {
                        let single = slot::read_id(&mut args)?;
                        let mut slots = slot::read_id_array(&mut args)?;
                        if slots.len() < 3 {
                            return Err(Fault::bad_arguments(
                                "exchange_uuids needs at least three slots",
                            ));
                        }
                        if slots[2].is_some() {
                            return Err(Fault::contract("Wrong UUID"));
                        }
                        let ret = slots[0];
                        slots[2] = slots[1];
                        slots[1] = single;
                        slots[0] = None;
                        Tag::UUID.encode(reply);
                        slot::write_id(ret, reply);
                        slot::write_id_array(&slots, reply);
                        Ok(())
                    }
                    Tag::ARRAY => {
                        Tag::expect(&mut args, Tag::UUID)?;
                        let ids = slot::read_id_seq(&mut args)?;
                        if ids.len() < 3 {
                            return Err(Fault::bad_arguments(
                                "exchange_uuids needs at least three elements",
                            ));
                        }
                        if ids[2].is_some() {
                            return Err(Fault::contract("Wrong UUID"));
                        }
                        slot::write_id_array(&ids[..2], reply);
                        Ok(())
                    }
                    other => Err(Fault::bad_arguments(format!(
                        "exchange_uuids has no variant for {other:?}"
                    ))),
                }
            }
            other => Err(Fault::unknown_method(other)),
        }
    }
}

/// Register the service on its endpoint with the policy the store requires.
pub fn serve(endpoint: &Endpoint) {
    let service = ValuesService::new(endpoint.affinity());
    endpoint.serve(SERVICE, std::sync::Arc::new(service), DispatchPolicy::Primary);
}
