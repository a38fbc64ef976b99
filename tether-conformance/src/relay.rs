//! The record passthrough service.
//!
//! A generic stub over any record type: the handler applies a transform and
//! the transformed record travels back as the return value, exercising
//! argument and return marshaling through one code path regardless of the
//! record. The conformance instance bumps both fields of a
//! [`Vertex`](crate::records::Vertex) by one.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};

use tether::{CallError, Dispatch, Endpoint, Fault, RemoteObject};
use tether_proto::{coding::Codec, DecodeError, Tag};

/// Name the service is registered under.
pub const SERVICE: &str = "relay";

/// Transform a record and return it.
pub const PASSTHROUGH: u32 = 1;

/// Caller half of the service, typed by the record it relays
#[derive(Debug)]
pub struct RelayProxy<T> {
    object: RemoteObject,
    marker: PhantomData<fn() -> T>,
}

impl<T: Codec> RelayProxy<T> {
    /// Wrap the root object resolved by a connect.
    pub fn new(object: RemoteObject) -> Self {
        Self {
            object,
            marker: PhantomData,
        }
    }

    /// Send the record through the transform at the peer.
    pub fn passthrough(&self, value: &T) -> Result<T, CallError> {
        let mut args = BytesMut::new();
        Tag::RECORD.encode(&mut args);
        value.encode(&mut args);
        let mut reply = self.object.call(PASSTHROUGH, args.freeze())?;
        Tag::expect(&mut reply, Tag::RECORD)?;
        Ok(T::decode(&mut reply).map_err(DecodeError::from)?)
    }
}

/// Server half: a transform over one record type
pub struct RelayService<T> {
    transform: Box<dyn Fn(T) -> T + Send + Sync>,
}

impl<T: Codec> RelayService<T> {
    /// Build the service around a transform.
    pub fn new(transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self {
            transform: Box::new(transform),
        }
    }
}

impl<T: Codec> Dispatch for RelayService<T> {
    fn dispatch(
        &self,
        _endpoint: &Endpoint,
        method: u32,
        mut args: Bytes,
        reply: &mut BytesMut,
    ) -> Result<(), Fault> {
        match method {
            PASSTHROUGH => {
                Tag::expect(&mut args, Tag::RECORD)?;
                let value = T::decode(&mut args).map_err(DecodeError::from)?;
                Tag::RECORD.encode(reply);
                (self.transform)(value).encode(reply);
                Ok(())
            }
            other => Err(Fault::unknown_method(other)),
        }
    }
}
