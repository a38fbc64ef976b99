//! The tether marshaling conformance contract.
//!
//! Three server-side services and one client-side callback interface, each
//! with a hand-written proxy/stub pair over the `tether-proto` contract, plus
//! the scoreboard that runs one predicate per conformance scenario and
//! classifies it pass/fail/exception.
//!
//! The scenarios are the contract: an independent implementation that wants to
//! interoperate must reproduce the argument tags, the overload dispatch, the
//! copy-back slots and the sentinel conventions exactly as the stubs here
//! expect them.

#![warn(missing_docs)]

pub mod compute;
pub mod faults;
pub mod harness;
pub mod records;
pub mod relay;
pub mod scoreboard;
pub mod values;

pub use harness::Harness;
pub use scoreboard::{Scoreboard, Verdict};
