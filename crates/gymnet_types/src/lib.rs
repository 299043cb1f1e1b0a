//! # Gymnet Types
//!
//! Data model shared by both ends of the gym bridge: the recursive [`Value`](data::value::Value)
//! tree, the [`Request`](data::envelope::Request) / [`Reply`](data::envelope::Reply) envelopes
//! built from it, and the [`EnvelopeCodec`](data::codec::EnvelopeCodec) that turns envelopes
//! into wire bytes and back.
//!
//! This crate performs no I/O. Framing, transports and the per-tick exchange live in
//! `gymnet_framework`.

pub mod data {
    pub mod codec;
    pub mod envelope;
    mod pickle_nesting;
    pub mod value;
}

pub mod prelude {
    pub use crate::data::codec::{CodecConfig, CodecError, EnvelopeCodec, WireFormat};
    pub use crate::data::envelope::{Reply, Request, Step};
    pub use crate::data::value::{DictItem, Value, ValueError};
}
