//! Endpoints: one per simulated process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use tether_proto::wire::{Frame, Owner, Status, WireHandle};

use crate::{
    config::EndpointConfig,
    error::{CallError, Fault},
    queue::{Affinity, DispatchQueue},
    registry::{Dispatch, DispatchPolicy},
    transport::{Duplex, Receiver, RecvError, Sender},
};

/// How long the demultiplexer sleeps between shutdown checks.
const POLL: Duration = Duration::from_millis(25);

/// Connection lifecycle notifications, delivered asynchronously
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The named service resolved; its proxy is usable from now on.
    Ready {
        /// Service name as passed to [`Endpoint::connect`].
        name: String,
        /// Root object of the service at the peer.
        object: RemoteObject,
    },
    /// The named service is gone, either because the connect failed or
    /// because the transport closed underneath an established session.
    Lost {
        /// Service name as passed to [`Endpoint::connect`].
        name: String,
    },
}

/// A cheaply clonable handle to one simulated process
///
/// Owns the process's primary dispatch queue, its inbound-call workers and
/// its object registry. All clones refer to the same process.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    tx: Box<dyn Sender>,
    next_corr: AtomicU64,
    next_object: AtomicU64,
    pending: Mutex<FxHashMap<u64, mpsc::Sender<ReplyMsg>>>,
    registry: Mutex<FxHashMap<u64, Registered>>,
    services: Mutex<FxHashMap<String, u64>>,
    connected: Mutex<Vec<String>>,
    queue: DispatchQueue,
    work: WorkQueue,
    events_tx: mpsc::Sender<ConnectionEvent>,
    shutdown: AtomicBool,
}

#[derive(Clone)]
struct Registered {
    object: Arc<dyn Dispatch>,
    policy: DispatchPolicy,
}

struct ReplyMsg {
    status: Status,
    body: Bytes,
}

enum Work {
    Call {
        corr_id: u64,
        target: u64,
        method: u32,
        args: Bytes,
    },
    Connect {
        corr_id: u64,
        name: String,
    },
}

#[derive(Default)]
struct WorkQueue {
    items: Mutex<VecDeque<Work>>,
    ready: Condvar,
}

impl WorkQueue {
    fn push(&self, work: Work) {
        self.items.lock().push_back(work);
        self.ready.notify_one();
    }

    /// Block for the next item; `None` once the endpoint is shutting down.
    fn pop(&self, shutdown: &AtomicBool) -> Option<Work> {
        let mut items = self.items.lock();
        loop {
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(work) = items.pop_front() {
                return Some(work);
            }
            self.ready.wait(&mut items);
        }
    }

    fn wake_all(&self) {
        self.ready.notify_all();
    }
}

impl Endpoint {
    /// Bring up a process on one side of a transport link.
    ///
    /// Spawns the primary dispatch thread, the frame demultiplexer and the
    /// worker pool. The returned receiver delivers [`ConnectionEvent`]s for
    /// every name later passed to [`Endpoint::connect`].
    pub fn new(
        name: impl Into<String>,
        config: &EndpointConfig,
        link: Duplex,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let name = name.into();
        let (events_tx, events_rx) = mpsc::channel();
        let inner = Arc::new(Inner {
            queue: DispatchQueue::start(&name),
            tx: link.tx,
            next_corr: AtomicU64::new(1),
            next_object: AtomicU64::new(1),
            pending: Mutex::default(),
            registry: Mutex::default(),
            services: Mutex::default(),
            connected: Mutex::default(),
            work: WorkQueue::default(),
            events_tx,
            shutdown: AtomicBool::new(false),
            name,
        });
        let endpoint = Self { inner };

        let demux = endpoint.clone();
        let rx = link.rx;
        thread::Builder::new()
            .name(format!("{}-demux", demux.inner.name))
            .spawn(move || demux.demux(rx))
            .expect("failed to spawn demultiplexer thread");

        for i in 0..config.workers {
            let worker = endpoint.clone();
            thread::Builder::new()
                .name(format!("{}-worker-{i}", worker.inner.name))
                .spawn(move || worker.work())
                .expect("failed to spawn worker thread");
        }

        (endpoint, events_rx)
    }

    /// The label this endpoint logs under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a dispatchable object and return its registry id.
    pub fn register(&self, object: Arc<dyn Dispatch>, policy: DispatchPolicy) -> u64 {
        let id = self.inner.next_object.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .lock()
            .insert(id, Registered { object, policy });
        id
    }

    /// Register a named root object the peer can [`connect`](Self::connect) to.
    pub fn serve(&self, name: &str, object: Arc<dyn Dispatch>, policy: DispatchPolicy) {
        let id = self.register(object, policy);
        debug!(endpoint = %self.inner.name, service = name, id, "serving");
        self.inner.services.lock().insert(name.to_string(), id);
    }

    /// Request a session with the peer's named service.
    ///
    /// Returns immediately; the outcome arrives as a [`ConnectionEvent`] on
    /// the channel handed out by [`Endpoint::new`].
    pub fn connect(&self, name: &str) {
        let endpoint = self.clone();
        let name = name.to_string();
        thread::Builder::new()
            .name(format!("{}-connect", self.inner.name))
            .spawn(move || {
                let event = match endpoint.connect_blocking(&name) {
                    Ok(object) => {
                        endpoint.inner.connected.lock().push(name.clone());
                        ConnectionEvent::Ready { name, object }
                    }
                    Err(err) => {
                        warn!(endpoint = %endpoint.inner.name, service = %name, %err, "connect failed");
                        ConnectionEvent::Lost { name }
                    }
                };
                let _ = endpoint.inner.events_tx.send(event);
            })
            .expect("failed to spawn connect thread");
    }

    fn connect_blocking(&self, name: &str) -> Result<RemoteObject, CallError> {
        let (corr_id, rx) = self.begin_call()?;
        self.send_frame(&Frame::Connect {
            corr_id,
            name: name.to_string(),
        })
        .map_err(|_| {
            self.inner.pending.lock().remove(&corr_id);
            CallError::Disconnected
        })?;
        let mut body = self.finish_call(rx)?;
        let handle = WireHandle::decode(&mut body)?;
        match self.import(handle).map_err(CallError::from)? {
            Imported::Remote(object) => Ok(object),
            Imported::Local(_) => Err(CallError::Reply(
                tether_proto::DecodeError::BadOwner(1),
            )),
        }
    }

    /// Invoke `method` on the peer object `target`, blocking until the reply.
    pub fn call(&self, target: u64, method: u32, args: Bytes) -> Result<Bytes, CallError> {
        let (corr_id, rx) = self.begin_call()?;
        trace!(endpoint = %self.inner.name, corr_id, target, method, "outgoing call");
        self.send_frame(&Frame::Call {
            corr_id,
            target,
            method,
            args,
        })
        .map_err(|_| {
            self.inner.pending.lock().remove(&corr_id);
            CallError::Disconnected
        })?;
        self.finish_call(rx)
    }

    fn begin_call(&self) -> Result<(u64, mpsc::Receiver<ReplyMsg>), CallError> {
        // After teardown nobody routes replies; fail instead of parking the
        // caller forever.
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(CallError::Disconnected);
        }
        let corr_id = self.inner.next_corr.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.inner.pending.lock().insert(corr_id, tx);
        Ok((corr_id, rx))
    }

    fn finish_call(&self, rx: mpsc::Receiver<ReplyMsg>) -> Result<Bytes, CallError> {
        let reply = rx.recv().map_err(|_| CallError::Disconnected)?;
        if reply.status.is_ok() {
            Ok(reply.body)
        } else {
            Err(CallError::Remote {
                status: reply.status,
                reason: String::from_utf8_lossy(&reply.body).into_owned(),
            })
        }
    }

    /// Turn a wire handle from an inbound frame into something callable.
    pub fn import(&self, handle: WireHandle) -> Result<Imported, Fault> {
        match handle.owner {
            // The frame's sender is our peer.
            Owner::Sender => Ok(Imported::Remote(RemoteObject {
                endpoint: self.clone(),
                id: handle.id,
            })),
            Owner::Receiver => {
                let registered = self.inner.registry.lock().get(&handle.id).cloned();
                match registered {
                    Some(r) => Ok(Imported::Local(r.object)),
                    None => Err(Fault {
                        status: Status::UNKNOWN_OBJECT,
                        reason: format!("no local object {}", handle.id),
                    }),
                }
            }
        }
    }

    /// Register a local object and produce the wire handle that references it
    /// from the next outgoing frame.
    pub fn export(&self, object: Arc<dyn Dispatch>, policy: DispatchPolicy) -> WireHandle {
        WireHandle {
            owner: Owner::Sender,
            id: self.register(object, policy),
        }
    }

    /// Post a task to the primary dispatch queue without waiting.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.queue.post(task);
    }

    /// Run `f` on the primary dispatch queue and block for its result.
    pub fn run_on_primary<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        self.inner.queue.run(f)
    }

    /// Token identifying this endpoint's primary dispatch thread.
    pub fn affinity(&self) -> Affinity {
        self.inner.queue.affinity()
    }

    /// Tear the endpoint down: fail pending calls, notify lost sessions and
    /// stop the workers. Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work.wake_all();
        // Dropping the reply senders unblocks every caller with Disconnected.
        self.inner.pending.lock().clear();
        for name in self.inner.connected.lock().drain(..) {
            let _ = self.inner.events_tx.send(ConnectionEvent::Lost { name });
        }
        debug!(endpoint = %self.inner.name, "endpoint closed");
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), crate::transport::Closed> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.inner.tx.send(buf.freeze())
    }

    fn send_reply(&self, corr_id: u64, status: Status, body: Bytes) {
        if self
            .send_frame(&Frame::Reply {
                corr_id,
                status,
                body,
            })
            .is_err()
        {
            trace!(endpoint = %self.inner.name, corr_id, "reply dropped, transport closed");
        }
    }

    /// Frame demultiplexer: replies to the blocked caller, calls to the pool.
    fn demux(&self, rx: Box<dyn Receiver>) {
        loop {
            if self.inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            let bytes = match rx.recv_timeout(POLL) {
                Ok(bytes) => bytes,
                Err(RecvError::TimedOut) => continue,
                Err(RecvError::Closed) => break,
            };
            match Frame::decode(bytes) {
                Ok(Frame::Reply {
                    corr_id,
                    status,
                    body,
                }) => {
                    let waiter = self.inner.pending.lock().remove(&corr_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(ReplyMsg { status, body });
                        }
                        None => {
                            warn!(endpoint = %self.inner.name, corr_id, "unsolicited reply")
                        }
                    }
                }
                Ok(Frame::Call {
                    corr_id,
                    target,
                    method,
                    args,
                }) => self.inner.work.push(Work::Call {
                    corr_id,
                    target,
                    method,
                    args,
                }),
                Ok(Frame::Connect { corr_id, name }) => {
                    self.inner.work.push(Work::Connect { corr_id, name })
                }
                Err(err) => {
                    warn!(endpoint = %self.inner.name, %err, "dropping malformed frame")
                }
            }
        }
        self.inner.shutdown.store(true, Ordering::Release);
        self.teardown();
    }

    /// Worker loop: service inbound calls until shutdown.
    fn work(&self) {
        while let Some(work) = self.inner.work.pop(&self.inner.shutdown) {
            match work {
                Work::Call {
                    corr_id,
                    target,
                    method,
                    args,
                } => {
                    let registered = self.inner.registry.lock().get(&target).cloned();
                    let Some(Registered { object, policy }) = registered else {
                        warn!(endpoint = %self.inner.name, target, "call for unknown object");
                        self.send_reply(
                            corr_id,
                            Status::UNKNOWN_OBJECT,
                            Bytes::from(format!("no object {target}").into_bytes()),
                        );
                        continue;
                    };
                    match policy {
                        DispatchPolicy::Inline => {
                            self.dispatch_and_reply(object, corr_id, method, args)
                        }
                        DispatchPolicy::Primary => {
                            let endpoint = self.clone();
                            self.inner.queue.post(move || {
                                endpoint.dispatch_and_reply(object, corr_id, method, args)
                            });
                        }
                    }
                }
                Work::Connect { corr_id, name } => {
                    let id = self.inner.services.lock().get(&name).copied();
                    match id {
                        Some(id) => {
                            let mut body = BytesMut::new();
                            WireHandle {
                                owner: Owner::Sender,
                                id,
                            }
                            .encode(&mut body);
                            self.send_reply(corr_id, Status::OK, body.freeze());
                        }
                        None => {
                            warn!(endpoint = %self.inner.name, service = %name, "connect for unknown service");
                            self.send_reply(
                                corr_id,
                                Status::UNKNOWN_SERVICE,
                                Bytes::from(name.into_bytes()),
                            );
                        }
                    }
                }
            }
        }
    }

    fn dispatch_and_reply(&self, object: Arc<dyn Dispatch>, corr_id: u64, method: u32, args: Bytes) {
        trace!(endpoint = %self.inner.name, corr_id, method, "dispatching");
        let mut reply = BytesMut::new();
        match object.dispatch(self, method, args, &mut reply) {
            Ok(()) => self.send_reply(corr_id, Status::OK, reply.freeze()),
            Err(fault) => {
                warn!(endpoint = %self.inner.name, corr_id, method, %fault, "call faulted");
                self.send_reply(corr_id, fault.status, Bytes::from(fault.reason.into_bytes()));
            }
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// A local object resolved from an inbound handle
pub enum Imported {
    /// The handle referenced one of our own registrations; calls can go
    /// straight through its stub without touching the transport.
    Local(Arc<dyn Dispatch>),
    /// The handle referenced a peer object.
    Remote(RemoteObject),
}

/// Proxy root: a reference to one object living at the peer
#[derive(Clone)]
pub struct RemoteObject {
    endpoint: Endpoint,
    id: u64,
}

impl RemoteObject {
    /// Registry id of the object at its owner.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The local endpoint this proxy calls out through.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Invoke a method on the peer object, blocking until the reply.
    pub fn call(&self, method: u32, args: Bytes) -> Result<Bytes, CallError> {
        self.endpoint.call(self.id, method, args)
    }

    /// The wire form referencing this object in a frame sent toward its
    /// owner: ownership flips to `Receiver` so the peer resolves it locally.
    pub fn handle(&self) -> WireHandle {
        WireHandle {
            owner: Owner::Receiver,
            id: self.id,
        }
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("endpoint", &self.endpoint.name())
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;
    use tether_proto::coding::{BufExt, BufMutExt, Codec};
    use tether_proto::Tag;

    fn subscribe() -> tracing::subscriber::DefaultGuard {
        let sub = tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_default(sub)
    }

    /// Doubles a tagged i32; the minimal possible stub.
    struct Doubler;

    impl Dispatch for Doubler {
        fn dispatch(
            &self,
            _endpoint: &Endpoint,
            method: u32,
            mut args: Bytes,
            reply: &mut BytesMut,
        ) -> Result<(), Fault> {
            match method {
                1 => {
                    Tag::expect(&mut args, Tag::I32)?;
                    let x = args.get::<i32>().map_err(tether_proto::DecodeError::from)?;
                    Tag::I32.encode(reply);
                    reply.write::<i32>(x * 2);
                    Ok(())
                }
                other => Err(Fault::unknown_method(other)),
            }
        }
    }

    fn pair_with_doubler() -> (Endpoint, mpsc::Receiver<ConnectionEvent>, Endpoint) {
        let (left, right) = transport::pair();
        let config = EndpointConfig::default();
        let (server, _server_events) = Endpoint::new("server", &config, right);
        server.serve("doubler", Arc::new(Doubler), DispatchPolicy::Inline);
        let (client, events) = Endpoint::new("client", &config, left);
        (client, events, server)
    }

    fn ready(events: &mpsc::Receiver<ConnectionEvent>) -> RemoteObject {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            ConnectionEvent::Ready { object, .. } => object,
            ConnectionEvent::Lost { name } => panic!("lost {name}"),
        }
    }

    #[test]
    fn call_round_trip() {
        let _guard = subscribe();
        let (client, events, _server) = pair_with_doubler();
        client.connect("doubler");
        let object = ready(&events);
        let mut args = BytesMut::new();
        Tag::I32.encode(&mut args);
        args.write::<i32>(21);
        let mut reply = object.call(1, args.freeze()).unwrap();
        Tag::expect(&mut reply, Tag::I32).unwrap();
        assert_eq!(reply.get::<i32>(), Ok(42));
    }

    #[test]
    fn unknown_service_reports_lost() {
        let _guard = subscribe();
        let (client, events, _server) = pair_with_doubler();
        client.connect("nonesuch");
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            ConnectionEvent::Lost { name } => assert_eq!(name, "nonesuch"),
            ConnectionEvent::Ready { name, .. } => panic!("unexpected ready for {name}"),
        }
    }

    #[test]
    fn unknown_method_faults() {
        let _guard = subscribe();
        let (client, events, _server) = pair_with_doubler();
        client.connect("doubler");
        let object = ready(&events);
        let err = object.call(99, Bytes::new()).unwrap_err();
        match err {
            CallError::Remote { status, .. } => assert_eq!(status, Status::UNKNOWN_METHOD),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn close_fails_pending_and_reports_lost() {
        let _guard = subscribe();
        let (client, events, _server) = pair_with_doubler();
        client.connect("doubler");
        let object = ready(&events);
        client.close();
        let err = object.call(1, Bytes::new()).unwrap_err();
        assert_eq!(err, CallError::Disconnected);
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            ConnectionEvent::Lost { name } => assert_eq!(name, "doubler"),
            ConnectionEvent::Ready { name, .. } => panic!("unexpected ready for {name}"),
        }
    }
}
