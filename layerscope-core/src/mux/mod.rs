//! Transport-keyed decoder muxing and connection expectations.
//!
//! The [`Muxer`] answers "which decoder handles this sub-payload" from a
//! transport kind and key: the link type of a capture, an ethertype, an IP
//! protocol number, a TCP or UDP port. Decoders are registered against key
//! ranges and resolved most-specific-first.

mod expect;
mod key;
mod table;

pub use expect::{Endpoint, ExpectDirection, Expectation, ExpectationTable, ObservedFlow};
pub use key::{KeyRange, TransportKind};
pub use table::{Binding, Muxer};
