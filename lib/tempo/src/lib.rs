//! `tempo` is the discrete-event kernel hosting the simulated cluster: a
//! virtual clock, an event queue drained in non-decreasing time order, and an
//! in-memory byte-stream network with reliable FIFO delivery per connection.

pub mod buffer;
pub mod event;
pub mod logging;
pub mod net;
pub mod sched;
pub mod time;

pub use crate::buffer::Buffer;
pub use crate::event::{Event, Token};
pub use crate::net::{Addr, ConnId, ListenerId, NetError};
pub use crate::sched::{Actor, ActorId, Kernel, Sim};
pub use crate::time::VirtualTime;
