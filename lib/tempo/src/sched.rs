use crate::event::{Event, Token};
use crate::net::{Addr, ConnId, ListenerId, NetError, Network};
use crate::time::VirtualTime;
use slog::Logger;
use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

pub type ActorId = usize;

/// A long-lived state machine driven purely by kernel events. Actors own
/// their state exclusively; the only way to affect another actor is through
/// the kernel's network.
pub trait Actor {
    fn on_event(&mut self, event: Event, kernel: &mut Kernel);

    /// Downcast hook so a finished simulation can be inspected.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Eq, PartialEq)]
struct Entry {
    at: VirtualTime,
    seq: u64,
    actor: ActorId,
    event: Event,
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The services an actor sees while handling an event: the clock, timers,
/// and the virtual network. Every operation is attributed to the actor
/// currently being dispatched.
pub struct Kernel {
    now: VirtualTime,
    seq: u64,
    queue: BinaryHeap<Reverse<Entry>>,
    net: Network,
    current: ActorId,
    log: Logger,
}

impl Kernel {
    fn new(latency: Duration, log: Logger) -> Kernel {
        Kernel {
            now: VirtualTime::ZERO,
            seq: 0,
            queue: BinaryHeap::new(),
            net: Network::new(latency),
            current: 0,
            log,
        }
    }

    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    #[inline]
    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Enqueues a `Timer(token)` event for the current actor after `dt` of
    /// virtual time.
    #[inline]
    pub fn schedule(&mut self, dt: Duration, token: Token) {
        let at = self.now + dt;
        let actor = self.current;
        self.push(at, actor, Event::Timer(token));
    }

    /// Binds a listener for the current actor. Inbound connections surface as
    /// `Accepted` events carrying the returned listener id.
    pub fn listen(&mut self, addr: Addr) -> Result<ListenerId, NetError> {
        self.net.listen(self.current, addr)
    }

    /// Opens a connection toward `remote`. The handle is returned at once;
    /// `Connected` or `ConnectFailed` follows after the link latency.
    pub fn dial(&mut self, remote: Addr) -> ConnId {
        let latency = self.net.latency();
        let at = self.now + latency;
        let actor = self.current;

        let outcome = self.net.dial(actor, remote);

        match outcome.accepted {
            Some(accepted) => {
                let peer = self.net.local_addr(outcome.conn);
                self.push(at, actor, Event::Connected(outcome.conn));
                self.push(
                    at,
                    accepted.owner,
                    Event::Accepted {
                        listener: accepted.listener,
                        conn: accepted.conn,
                        peer,
                    },
                );
            }
            None => self.push(at, actor, Event::ConnectFailed(outcome.conn)),
        }

        outcome.conn
    }

    /// Appends bytes to the connection's send stream. Delivery is eventual,
    /// ordered, and reliable; bytes toward a closed endpoint are dropped.
    pub fn send(&mut self, conn: ConnId, bytes: &[u8]) {
        if let Some(delivery) = self.net.send(conn, self.now, bytes) {
            self.push(delivery.arrival, delivery.owner, Event::Readable(delivery.conn));
        }
    }

    /// Reads any prefix of what has arrived on `conn` into `out`.
    pub fn recv(&mut self, conn: ConnId, out: &mut [u8]) -> usize {
        self.net.deliver_due(conn, self.now);
        self.net.recv(conn, out)
    }

    #[inline]
    pub fn close(&mut self, conn: ConnId) {
        self.net.close(conn);
    }

    #[inline]
    pub fn is_open(&self, conn: ConnId) -> bool {
        self.net.is_open(conn)
    }

    #[inline]
    pub fn peer_addr(&self, conn: ConnId) -> Addr {
        self.net.peer_addr(conn)
    }

    fn push(&mut self, at: VirtualTime, actor: ActorId, event: Event) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Entry {
            at,
            seq,
            actor,
            event,
        }));
    }
}

/// The simulation: a kernel plus the actor table. Events are drained in
/// non-decreasing time order and every handler runs to completion before the
/// next is dispatched.
pub struct Sim {
    kernel: Kernel,
    actors: Vec<Option<Box<dyn Actor>>>,
}

impl Sim {
    pub fn new(latency: Duration, log: Logger) -> Sim {
        Sim {
            kernel: Kernel::new(latency, log),
            actors: Vec::new(),
        }
    }

    /// Registers an actor and schedules its `Start` event at the current
    /// virtual time.
    pub fn add_actor(&mut self, actor: Box<dyn Actor>) -> ActorId {
        let id = self.actors.len();
        self.actors.push(Some(actor));
        let at = self.kernel.now;
        self.kernel.push(at, id, Event::Start);
        id
    }

    /// Runs until the event queue is empty.
    pub fn run(&mut self) {
        while self.step() {}
    }

    /// Runs until the queue is empty or the next event lies beyond `deadline`.
    pub fn run_until(&mut self, deadline: VirtualTime) {
        loop {
            let due = match self.kernel.queue.peek() {
                Some(Reverse(entry)) => entry.at <= deadline,
                None => false,
            };

            if !due || !self.step() {
                break;
            }
        }
    }

    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.kernel.now
    }

    /// Inspects a finished (or paused) actor by concrete type.
    pub fn actor<T: Actor + 'static>(&self, id: ActorId) -> Option<&T> {
        self.actors
            .get(id)?
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    fn step(&mut self) -> bool {
        let Reverse(entry) = match self.kernel.queue.pop() {
            Some(entry) => entry,
            None => return false,
        };

        debug_assert!(entry.at >= self.kernel.now, "Time ran backwards");
        self.kernel.now = entry.at;
        self.kernel.current = entry.actor;

        if let Event::Readable(conn) = entry.event {
            self.kernel.net.deliver_due(conn, entry.at);
        }

        // The actor is lifted out of the table for the duration of the
        // callback so it can borrow the kernel mutably.
        let mut actor = match self.actors.get_mut(entry.actor).and_then(Option::take) {
            Some(actor) => actor,
            None => return true,
        };

        actor.on_event(entry.event, &mut self.kernel);
        self.actors[entry.actor] = Some(actor);

        true
    }
}
