//! The boundary a frame actually crosses.
//!
//! Real transports are external collaborators; the runtime only needs a way
//! to push one encoded frame toward the peer and to block for the next
//! inbound one. The in-memory [`pair`] used by tests still forces every value
//! through its byte encoding: nothing but owned buffers crosses the channel.

use std::sync::mpsc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// The peer is gone and no further frames can be delivered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transport closed")]
pub struct Closed;

/// Outcome of waiting for an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived within the wait; the transport is still up.
    TimedOut,
    /// The transport closed; no more frames will ever arrive.
    Closed,
}

/// Sending half of a transport link.
pub trait Sender: Send + Sync {
    /// Queue one encoded frame for delivery to the peer.
    fn send(&self, frame: Bytes) -> Result<(), Closed>;
}

/// Receiving half of a transport link.
pub trait Receiver: Send {
    /// Block for the next inbound frame, up to `timeout`.
    fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, RecvError>;
}

/// Both halves of one side of a link.
pub struct Duplex {
    /// Frames toward the peer.
    pub tx: Box<dyn Sender>,
    /// Frames from the peer.
    pub rx: Box<dyn Receiver>,
}

struct ChannelSender(mpsc::Sender<Bytes>);

impl Sender for ChannelSender {
    fn send(&self, frame: Bytes) -> Result<(), Closed> {
        self.0.send(frame).map_err(|_| Closed)
    }
}

struct ChannelReceiver(mpsc::Receiver<Bytes>);

impl Receiver for ChannelReceiver {
    fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, RecvError> {
        self.0.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => RecvError::TimedOut,
            mpsc::RecvTimeoutError::Disconnected => RecvError::Closed,
        })
    }
}

/// An in-memory link: two connected duplex halves.
pub fn pair() -> (Duplex, Duplex) {
    let (ltx, rrx) = mpsc::channel();
    let (rtx, lrx) = mpsc::channel();
    (
        Duplex {
            tx: Box::new(ChannelSender(ltx)),
            rx: Box::new(ChannelReceiver(lrx)),
        },
        Duplex {
            tx: Box::new(ChannelSender(rtx)),
            rx: Box::new(ChannelReceiver(rrx)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_cross_both_ways() {
        let (a, b) = pair();
        a.tx.send(Bytes::from_static(b"ping")).unwrap();
        b.tx.send(Bytes::from_static(b"pong")).unwrap();
        let t = Duration::from_secs(1);
        assert_eq!(b.rx.recv_timeout(t).unwrap(), Bytes::from_static(b"ping"));
        assert_eq!(a.rx.recv_timeout(t).unwrap(), Bytes::from_static(b"pong"));
    }

    #[test]
    fn drop_closes() {
        let (a, b) = pair();
        drop(b);
        assert!(a.tx.send(Bytes::from_static(b"x")).is_err());
        assert_eq!(
            a.rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvError::Closed)
        );
    }
}
