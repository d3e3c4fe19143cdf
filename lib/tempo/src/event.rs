use crate::net::{Addr, ConnId, ListenerId};

/// Opaque timer payload chosen by the scheduling actor.
pub type Token = u64;

/// The callback set an actor can be woken with. Between events no other actor
/// observes intermediate state; an actor yields only by returning from its
/// handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    /// Delivered once, when the simulation starts.
    Start,
    /// A timer registered with `Kernel::schedule` has fired.
    Timer(Token),
    /// An outbound `dial` completed; the connection is writable.
    Connected(ConnId),
    /// An outbound `dial` found no listener at the remote address.
    ConnectFailed(ConnId),
    /// A listener produced a new inbound connection.
    Accepted {
        listener: ListenerId,
        conn: ConnId,
        peer: Addr,
    },
    /// New bytes arrived on a connection; the handler may read any prefix.
    Readable(ConnId),
}
