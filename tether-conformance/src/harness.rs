//! Connection-driven scenario registration.
//!
//! The harness owns the client endpoint and the scoreboard. Each
//! connection-ready notification registers the scenarios that need that
//! service and re-runs the classifier; every outgoing call is issued from the
//! endpoint's primary dispatch queue, a simplification that holds because
//! each scenario call is short-lived.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use tether::{CallError, ConnectionEvent, Endpoint};

use crate::{
    compute::ComputeHandle,
    faults::{self, FaultsProxy},
    records::{SparseFlags, Tally, Vertex},
    relay::{self, RelayProxy},
    scoreboard::Scoreboard,
    values::{self, ValuesProxy},
};

/// The conformance harness: one client endpoint plus its scoreboard
pub struct Harness {
    endpoint: Endpoint,
    board: Arc<Mutex<Scoreboard>>,
}

impl Harness {
    /// Wrap the client endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            board: Arc::new(Mutex::new(Scoreboard::new())),
        }
    }

    /// The scoreboard, shared with whatever renders it.
    pub fn board(&self) -> Arc<Mutex<Scoreboard>> {
        self.board.clone()
    }

    /// Request sessions with every service the scenarios need.
    pub fn connect_all(&self) {
        for name in [values::SERVICE, faults::SERVICE, relay::SERVICE] {
            self.endpoint.connect(name);
        }
    }

    /// Feed one connection notification through the harness.
    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Ready { name, object } => {
                info!(service = %name, "session ready");
                match name.as_str() {
                    values::SERVICE => self.add_values_scenarios(ValuesProxy::new(object)),
                    faults::SERVICE => self.add_fault_scenarios(FaultsProxy::new(object)),
                    relay::SERVICE => self.add_relay_scenarios(RelayProxy::new(object)),
                    other => warn!(service = other, "no scenarios for this service"),
                }
                self.run_pending();
            }
            ConnectionEvent::Lost { name } => warn!(service = %name, "session lost"),
        }
    }

    /// Run every unresolved scenario, from the primary dispatch queue.
    pub fn run_pending(&self) {
        let board = self.board.clone();
        self.endpoint.run_on_primary(move || board.lock().run_pending());
    }

    fn add(&self, predicate: impl FnMut() -> Result<bool, CallError> + Send + 'static) {
        self.board.lock().add(predicate);
    }

    fn add_values_scenarios(&self, proxy: ValuesProxy) {
        let p = proxy.clone();
        self.add(move || Ok(p.simple_send_receive(12, 34)? == 46));

        let p = proxy.clone();
        self.add(move || Ok(p.simple_send_receive_f(1.5, 2.5)? == 3.75));

        let p = proxy.clone();
        self.add(move || {
            let mut flags = SparseFlags::new();
            flags.put(10, true);
            flags.put(20, false);
            flags.put(190, true);
            flags.put(5, true);
            flags.put(2, true);
            Ok(p.sum_keys(&flags)? == 207)
        });

        let p = proxy.clone();
        self.add(move || {
            p.store_values_in_main_thread(&[1, 4, 7, 10, 20])?;
            p.store_values_in_main_thread(&[9, 6, 4, 5, 17])?;
            let mut count = [0];
            let keys = p.extract_values_in_main_thread(&mut count)?;
            if count[0] != 9 {
                return Ok(false);
            }
            Ok(keys == [1, 4, 5, 6, 7, 9, 10, 17, 20])
        });

        let p = proxy.clone();
        self.add(move || {
            let mut record = Vertex::new(5, 12);
            let mut point = Vertex::new(9, -14);
            p.swap_xy(&mut record, &mut point)?;
            Ok(record == Vertex::new(12, 5) && point == Vertex::new(-14, 9))
        });

        let p = proxy.clone();
        self.add(move || {
            let handles = vec![
                ComputeHandle::from_fn(|x, y| x + y),
                ComputeHandle::from_fn(|x, y| x - y),
                ComputeHandle::from_fn(|x, y| x * y),
                ComputeHandle::from_fn(|x, y| x / y),
                ComputeHandle::from_fn(|_, _| 42),
            ];
            Ok(p.compute_results(&handles)? == [15, -3, 54, 0, 42])
        });

        let p = proxy.clone();
        self.add(move || {
            let mut clients = Vec::new();
            p.populate_clients(&mut clients)?;
            if clients.len() != 2 {
                return Ok(false);
            }
            // Invoking these re-enters the server.
            Ok(clients[0].compute(3, 4)? == 25 && clients[1].compute(7, 6)? == 13)
        });

        let p = proxy.clone();
        self.add(move || {
            let tallies = [
                Tally::new(70, 9, -21),
                Tally::new(13, 22, 5),
                Tally::new(6, 43, 13),
            ];
            Ok(p.combine_serializables(&tallies)? == Tally::new(89, -74, -3))
        });

        let p = proxy.clone();
        self.add(move || Ok(p.create_inner_parcelable(5.5)?.z == 5.5));

        let p = proxy.clone();
        self.add(move || {
            let a = Uuid::new_v4();
            let b = Uuid::from_u64_pair(0, 0);
            let c = Uuid::from_u64_pair(u64::MAX, u64::MAX);

            let mut slots = vec![Some(a), Some(b), None];
            let ret = p.exchange_uuids(Some(c), &mut slots)?;

            let mut rest = vec![None; 4];
            let ret2 = p.exchange_uuids(None, &mut rest)?;

            Ok(ret2.is_none()
                && ret == Some(a)
                && slots == [None, Some(c), Some(b)]
                && rest == [None, None, None, None])
        });

        let p = proxy.clone();
        self.add(move || {
            let ids = [
                Some(Uuid::from_u64_pair(123, 456)),
                Some(Uuid::from_u64_pair(9876, 5432)),
                None,
            ];
            let res = p.exchange_uuids_seq(&ids)?;
            Ok(res == ids[..2])
        });

        let p = proxy;
        self.add(move || {
            // Sentinel violation: the fault must surface and the caller's
            // slots must show no partial mutation.
            let before = vec![None, None, Some(Uuid::from_u64_pair(1, 1))];
            let mut slots = before.clone();
            match p.exchange_uuids(Some(Uuid::from_u64_pair(2, 2)), &mut slots) {
                Err(CallError::Remote { status, reason }) => {
                    Ok(status == tether_proto::Status::CONTRACT_FAULT
                        && reason == "Wrong UUID"
                        && slots == before)
                }
                Err(err) => Err(err),
                Ok(_) => Ok(false),
            }
        });
    }

    fn add_fault_scenarios(&self, proxy: FaultsProxy) {
        let p = proxy.clone();
        self.add(move || match p.deref_null_in_client(None) {
            Err(CallError::Validation(_)) => Ok(true),
            Err(err) => Err(err),
            Ok(()) => Ok(false),
        });

        let p = proxy;
        self.add(move || {
            p.deref_null_in_server(None)?;
            Ok(true)
        });
    }

    fn add_relay_scenarios(&self, proxy: RelayProxy<Vertex>) {
        self.add(move || Ok(proxy.passthrough(&Vertex::new(3, 4))? == Vertex::new(4, 5)));
    }
}
