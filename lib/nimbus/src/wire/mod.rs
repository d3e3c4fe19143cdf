//! The wire modules define the three protocols binding the cluster: every
//! logical message is a 4-byte big-endian type discriminator followed by a
//! per-type payload of fixed-width integers, length-prefixed strings, and
//! u32-encoded booleans.

pub mod cluster;
pub mod framer;
pub mod pipeline;
pub mod support;

pub use crate::wire::cluster::{ClusterMsg, NameMsg};
pub use crate::wire::framer::{Framer, Inbound};
pub use crate::wire::pipeline::{PacketHeader, PipeMsg};
pub use crate::wire::support::{Message, WireError};
