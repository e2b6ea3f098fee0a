//! Adapter event protocol: the internal shape every vendor `StreamHandler`
//! writes to its sink, and the OpenAI SSE envelope that wraps it on the way
//! out to the client.
//!
//! This crate defines the wire shape of a single adapter event and envelope
//! injection. It does not depend on `gateway-core`; `gateway-core` bridges a
//! vendor's native frames into [`AdapterEvent`] and calls [`to_json`] /
//! [`to_sse_line`] to render the OpenAI-compatible chunk.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, to_sse_line, ChunkEnvelope, DONE_LINE};
pub use event::{AdapterEvent, FinishReason};
