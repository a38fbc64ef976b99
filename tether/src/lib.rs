//! Synchronous cross-process call runtime.
//!
//! Each simulated process is an [`Endpoint`]: a primary dispatch queue (the
//! process's single serialized authoritative context), a small pool of worker
//! threads servicing inbound calls, and a registry of dispatchable objects.
//! Outgoing calls block the calling thread until the reply frame arrives; a
//! call either completes or the transport is gone. There are no timeouts and
//! no cancellation.
//!
//! The byte-level contract lives in `tether-proto`; this crate never inspects
//! argument payloads, it only routes them. Proxies and stubs for concrete
//! interfaces are written against [`Endpoint::call`] and the [`Dispatch`]
//! trait.

#![warn(missing_docs)]

mod config;
mod endpoint;
mod error;
mod queue;
mod registry;
pub mod transport;

pub use config::EndpointConfig;
pub use endpoint::{ConnectionEvent, Endpoint, Imported, RemoteObject};
pub use error::{CallError, Fault};
pub use queue::Affinity;
pub use registry::{Dispatch, DispatchPolicy};
