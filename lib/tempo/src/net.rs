use crate::buffer::Buffer;
use crate::sched::ActorId;
use crate::time::VirtualTime;
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

pub type ConnId = usize;
pub type ListenerId = usize;

/// An IPv4-shaped address plus port. The kernel does not route; an address is
/// only an identity a listener binds to and a dialer names.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Addr {
    pub ip: u32,
    pub port: u16,
}

impl Addr {
    #[inline]
    pub fn new(ip: u32, port: u16) -> Addr {
        Addr { ip, port }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.ip >> 24,
            (self.ip >> 16) & 0xff,
            (self.ip >> 8) & 0xff,
            self.ip & 0xff,
            self.port
        )
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum NetError {
    AddrInUse(Addr),
}

/// One side of an established connection. Each side holds its own handle, its
/// own readable buffer, and the queue of chunks still in flight toward it.
struct Endpoint {
    owner: ActorId,
    peer: Option<ConnId>,
    local: Addr,
    remote: Addr,
    readable: Buffer,
    inflight: VecDeque<(VirtualTime, Vec<u8>)>,
    open: bool,
}

struct Listener {
    id: ListenerId,
    owner: ActorId,
}

/// Outcome of a dial: the dialer-side handle plus, when a listener was bound
/// at the remote address, the accepted-side handle and its owner.
pub(crate) struct DialOutcome {
    pub conn: ConnId,
    pub accepted: Option<AcceptedConn>,
}

pub(crate) struct AcceptedConn {
    pub conn: ConnId,
    pub owner: ActorId,
    pub listener: ListenerId,
}

pub(crate) struct Delivery {
    pub conn: ConnId,
    pub owner: ActorId,
    pub arrival: VirtualTime,
}

/// The in-memory network: listener table and connection endpoints addressed
/// by integer handles. Delivery is reliable and FIFO per direction, delayed
/// by the configured link latency; bytes addressed to a closed endpoint are
/// dropped.
pub(crate) struct Network {
    latency: Duration,
    listeners: HashMap<Addr, Listener>,
    listener_count: usize,
    endpoints: Vec<Endpoint>,
    next_ephemeral: u16,
}

impl Network {
    pub fn new(latency: Duration) -> Network {
        Network {
            latency,
            listeners: HashMap::new(),
            listener_count: 0,
            endpoints: Vec::new(),
            next_ephemeral: 49152,
        }
    }

    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn listen(&mut self, owner: ActorId, addr: Addr) -> Result<ListenerId, NetError> {
        if self.listeners.contains_key(&addr) {
            return Err(NetError::AddrInUse(addr));
        }

        let id = self.listener_count;
        self.listener_count += 1;
        self.listeners.insert(addr, Listener { id, owner });
        Ok(id)
    }

    pub fn dial(&mut self, owner: ActorId, remote: Addr) -> DialOutcome {
        let local = Addr::new(0, self.next_ephemeral);
        self.next_ephemeral = self.next_ephemeral.wrapping_add(1).max(49152);

        let conn = self.new_endpoint(owner, local, remote);

        let accepted = match self.listeners.get(&remote) {
            Some(listener) => {
                let (listener_id, listener_owner) = (listener.id, listener.owner);
                let accepted = self.new_endpoint(listener_owner, remote, local);
                self.endpoints[conn].peer = Some(accepted);
                self.endpoints[accepted].peer = Some(conn);
                Some(AcceptedConn {
                    conn: accepted,
                    owner: listener_owner,
                    listener: listener_id,
                })
            }
            None => None,
        };

        DialOutcome { conn, accepted }
    }

    /// Queues bytes toward the peer of `conn`. Returns the receiver to wake,
    /// or `None` when either side is closed or the dial never completed.
    pub fn send(&mut self, conn: ConnId, now: VirtualTime, bytes: &[u8]) -> Option<Delivery> {
        if bytes.is_empty() || !self.endpoints[conn].open {
            return None;
        }

        let peer = self.endpoints[conn].peer?;
        if !self.endpoints[peer].open {
            return None;
        }

        let arrival = now + self.latency;
        let receiver = &mut self.endpoints[peer];
        receiver.inflight.push_back((arrival, bytes.to_vec()));

        Some(Delivery {
            conn: peer,
            owner: receiver.owner,
            arrival,
        })
    }

    /// Moves every chunk that has arrived by `now` into the readable buffer.
    pub fn deliver_due(&mut self, conn: ConnId, now: VirtualTime) {
        let endpoint = &mut self.endpoints[conn];

        if !endpoint.open {
            endpoint.inflight.clear();
            return;
        }

        while let Some((arrival, _)) = endpoint.inflight.front() {
            if *arrival > now {
                break;
            }
            let (_, chunk) = endpoint.inflight.pop_front().unwrap();
            endpoint.readable.extend(&chunk);
        }
    }

    #[inline]
    pub fn recv(&mut self, conn: ConnId, out: &mut [u8]) -> usize {
        self.endpoints[conn].readable.drain_into(out)
    }

    #[inline]
    pub fn readable_len(&self, conn: ConnId) -> usize {
        self.endpoints[conn].readable.len()
    }

    pub fn close(&mut self, conn: ConnId) {
        let endpoint = &mut self.endpoints[conn];
        endpoint.open = false;
        endpoint.readable.clear();
        endpoint.inflight.clear();
    }

    #[inline]
    pub fn is_open(&self, conn: ConnId) -> bool {
        self.endpoints[conn].open
    }

    #[inline]
    pub fn local_addr(&self, conn: ConnId) -> Addr {
        self.endpoints[conn].local
    }

    #[inline]
    pub fn peer_addr(&self, conn: ConnId) -> Addr {
        self.endpoints[conn].remote
    }

    fn new_endpoint(&mut self, owner: ActorId, local: Addr, remote: Addr) -> ConnId {
        let id = self.endpoints.len();
        self.endpoints.push(Endpoint {
            owner,
            peer: None,
            local,
            remote,
            readable: Buffer::new(),
            inflight: VecDeque::new(),
            open: true,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAT: Duration = Duration::from_micros(50);

    #[test]
    fn test_listen_rejects_duplicate_bind() {
        let mut net = Network::new(LAT);
        let addr = Addr::new(0x0a000001, 9000);

        net.listen(0, addr).unwrap();
        assert_eq!(net.listen(1, addr), Err(NetError::AddrInUse(addr)));
    }

    #[test]
    fn test_dial_without_listener_has_no_peer() {
        let mut net = Network::new(LAT);
        let outcome = net.dial(0, Addr::new(0x0a000001, 9000));

        assert!(outcome.accepted.is_none());
        assert!(net
            .send(outcome.conn, VirtualTime::ZERO, &[1, 2, 3])
            .is_none());
    }

    #[test]
    fn test_fifo_delivery_after_latency() {
        let mut net = Network::new(LAT);
        let addr = Addr::new(0x0a000001, 9000);
        net.listen(1, addr).unwrap();

        let outcome = net.dial(0, addr);
        let accepted = outcome.accepted.unwrap();

        let first = net.send(outcome.conn, VirtualTime::ZERO, &[1, 2]).unwrap();
        net.send(outcome.conn, VirtualTime::ZERO, &[3]).unwrap();

        assert_eq!(first.conn, accepted.conn);
        assert_eq!(first.owner, 1);
        assert_eq!(first.arrival, VirtualTime::ZERO + LAT);

        // Nothing readable before the latency has elapsed.
        net.deliver_due(accepted.conn, VirtualTime::ZERO);
        assert_eq!(net.readable_len(accepted.conn), 0);

        net.deliver_due(accepted.conn, first.arrival);
        let mut out = [0u8; 8];
        assert_eq!(net.recv(accepted.conn, &mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_send_to_closed_endpoint_dropped() {
        let mut net = Network::new(LAT);
        let addr = Addr::new(0x0a000001, 9000);
        net.listen(1, addr).unwrap();

        let outcome = net.dial(0, addr);
        let accepted = outcome.accepted.unwrap();

        net.close(accepted.conn);
        assert!(net.send(outcome.conn, VirtualTime::ZERO, &[1]).is_none());
    }

    #[test]
    fn test_inflight_dropped_when_receiver_closes() {
        let mut net = Network::new(LAT);
        let addr = Addr::new(0x0a000001, 9000);
        net.listen(1, addr).unwrap();

        let outcome = net.dial(0, addr);
        let accepted = outcome.accepted.unwrap();

        let delivery = net.send(outcome.conn, VirtualTime::ZERO, &[1, 2]).unwrap();
        net.close(accepted.conn);

        net.deliver_due(accepted.conn, delivery.arrival);
        assert_eq!(net.readable_len(accepted.conn), 0);
    }
}
