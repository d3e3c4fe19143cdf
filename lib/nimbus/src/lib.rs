//! `nimbus` is a simplified HDFS-like distributed filesystem simulated on a
//! fat-tree interconnect: a coordinator mapping files to blocks and blocks to
//! replica pipelines, storage workers splicing those pipelines, and clients
//! pushing block data through them packet by packet.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod counters;
pub mod fabric;
pub mod wire;
pub mod worker;

pub use crate::client::{Client, ClientConfig, FileSpec};
pub use crate::config::{RunConfig, SimConfig};
pub use crate::coordinator::{Coordinator, FifoPlacement, Placement};
pub use crate::counters::{ErrorCounters, ErrorKind};
pub use crate::worker::Worker;
