/// The error taxonomy. Nothing is surfaced above the actor boundary; a
/// failure is recorded here, logged, and the offending request dropped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A fixed-size table was full; the request was dropped without a reply.
    CapacityExceeded,
    /// A message arrived in a state that does not accept it.
    StateViolation,
    /// The type discriminator named no message of the connection's protocol.
    UnknownMessage,
    /// A worker could not find its own IP in a received pipeline vector.
    SelfNotInPipeline,
    /// An outbound dial found nobody listening.
    ConnectFailed,
}

/// Per-actor error-event counters, one per taxonomy kind.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ErrorCounters {
    capacity_exceeded: u64,
    state_violation: u64,
    unknown_message: u64,
    self_not_in_pipeline: u64,
    connect_failed: u64,
}

impl ErrorCounters {
    pub fn new() -> ErrorCounters {
        ErrorCounters::default()
    }

    pub fn record(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::CapacityExceeded => self.capacity_exceeded += 1,
            ErrorKind::StateViolation => self.state_violation += 1,
            ErrorKind::UnknownMessage => self.unknown_message += 1,
            ErrorKind::SelfNotInPipeline => self.self_not_in_pipeline += 1,
            ErrorKind::ConnectFailed => self.connect_failed += 1,
        }
    }

    pub fn get(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::CapacityExceeded => self.capacity_exceeded,
            ErrorKind::StateViolation => self.state_violation,
            ErrorKind::UnknownMessage => self.unknown_message,
            ErrorKind::SelfNotInPipeline => self.self_not_in_pipeline,
            ErrorKind::ConnectFailed => self.connect_failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.capacity_exceeded
            + self.state_violation
            + self.unknown_message
            + self.self_not_in_pipeline
            + self.connect_failed
    }
}
