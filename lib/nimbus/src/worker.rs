use crate::config::SimConfig;
use crate::counters::{ErrorCounters, ErrorKind};
use crate::fabric::HostLoc;
use crate::wire::{ClusterMsg, Framer, Inbound, Message, PacketHeader, PipeMsg, WireError};
use hashbrown::HashMap;
use slog::{debug, error, info, o, trace, Logger};
use std::any::Any;
use tempo::{Actor, Addr, ConnId, Event, Kernel, ListenerId};

/// Per-block lifecycle on a worker.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerBlockPhase {
    /// Intermediate waiting for its successor's reply.
    PipelineRequested,
    PipelineEstablished,
    TransferInProgress,
    TransferCompleted,
}

/// State of one block flowing through this worker. `conn_next` is `None`
/// exactly when the worker is the pipeline tail.
pub struct WorkerBlock {
    pub block_id: u32,
    conn_prev: ConnId,
    conn_next: Option<ConnId>,
    /// Encoded `PipelineCreateReq` held until the successor connection
    /// succeeds.
    pending_create: Option<Vec<u8>>,

    pub phase: WorkerBlockPhase,

    cur_packet_id: u32,
    cur_packet_size: u32,
    cur_last_packet: bool,
    bytes_rcvd: u32,

    pub packets_received: u32,
    pub packets_completed: u32,
}

/// A storage worker: registers with the coordinator, accepts pipeline-create
/// requests, relays bulk data forward and acks/completions backward, and
/// terminates the pipeline when it is the tail.
pub struct Worker {
    location: HostLoc,
    ip: u32,
    coordinator: Addr,
    pipeline_port: u16,
    max_blocks: usize,

    coord_conn: Option<ConnId>,
    coord_framer: Framer<ClusterMsg>,
    registered: bool,

    listener: Option<ListenerId>,
    blocks: Vec<WorkerBlock>,
    prev_framers: HashMap<ConnId, Framer<PipeMsg>>,
    next_framers: HashMap<ConnId, Framer<PipeMsg>>,

    counters: ErrorCounters,
    log: Logger,
}

impl Worker {
    pub fn new(location: HostLoc, ip: u32, config: &SimConfig, log: &Logger) -> Worker {
        Worker {
            location,
            ip,
            coordinator: Addr::new(0, 0),
            pipeline_port: config.worker_pipeline_port,
            max_blocks: config.max_blocks_per_worker,
            coord_conn: None,
            coord_framer: Framer::new(),
            registered: false,
            listener: None,
            blocks: Vec::new(),
            prev_framers: HashMap::new(),
            next_framers: HashMap::new(),
            counters: ErrorCounters::new(),
            log: log.new(o!("actor" => "worker", "ip" => ip)),
        }
    }

    /// Points the worker at the coordinator's worker-facing endpoint.
    pub fn with_coordinator(mut self, coordinator: Addr) -> Worker {
        self.coordinator = coordinator;
        self
    }

    #[inline]
    pub fn ip(&self) -> u32 {
        self.ip
    }

    #[inline]
    pub fn location(&self) -> HostLoc {
        self.location
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn blocks(&self) -> &[WorkerBlock] {
        &self.blocks
    }

    pub fn block(&self, block_id: u32) -> Option<&WorkerBlock> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    fn on_coordinator_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        self.coord_framer.fill(kernel, conn);

        loop {
            match self.coord_framer.pull() {
                Ok(Inbound::Msg(ClusterMsg::RegisterRep { result })) => {
                    info!(self.log, "registration acknowledged"; "result" => result);
                    self.registered = result == 0;
                }
                Ok(other) => {
                    debug!(self.log, "unexpected coordinator traffic"; "msg" => ?other);
                    self.counters.record(ErrorKind::StateViolation);
                }
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message from coordinator"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    break;
                }
            }
        }
    }

    /// Handles a `PipelineCreateReq` arriving on an upstream connection.
    fn on_pipeline_create(
        &mut self,
        conn: ConnId,
        block_id: u32,
        pipeline: Vec<u32>,
        kernel: &mut Kernel,
    ) {
        if self.blocks.len() >= self.max_blocks {
            error!(self.log, "block table full, dropping pipeline";
                   "block_id" => block_id, "capacity" => self.max_blocks);
            self.counters.record(ErrorKind::CapacityExceeded);
            return;
        }

        let own_index = match pipeline.iter().position(|ip| *ip == self.ip) {
            Some(index) => index,
            None => {
                error!(self.log, "own address missing from pipeline";
                       "block_id" => block_id, "pipeline" => ?pipeline);
                self.counters.record(ErrorKind::SelfNotInPipeline);
                return;
            }
        };

        let is_tail = own_index == pipeline.len() - 1;

        debug!(self.log, "pipeline create";
               "block_id" => block_id,
               "position" => own_index,
               "tail" => is_tail);

        let mut block = WorkerBlock {
            block_id,
            conn_prev: conn,
            conn_next: None,
            pending_create: None,
            phase: WorkerBlockPhase::PipelineRequested,
            cur_packet_id: 0,
            cur_packet_size: 0,
            cur_last_packet: false,
            bytes_rcvd: 0,
            packets_received: 0,
            packets_completed: 0,
        };

        if is_tail {
            block.phase = WorkerBlockPhase::PipelineEstablished;
            self.blocks.push(block);

            kernel.send(
                conn,
                &PipeMsg::PipelineCreateRep {
                    result: 0,
                    block_id,
                }
                .to_bytes(),
            );
        } else {
            let successor = Addr::new(pipeline[own_index + 1], self.pipeline_port);
            let next_conn = kernel.dial(successor);

            block.conn_next = Some(next_conn);
            block.pending_create = Some(
                PipeMsg::PipelineCreateReq { block_id, pipeline }.to_bytes(),
            );

            self.next_framers.insert(next_conn, Framer::new());
            self.blocks.push(block);
        }
    }

    fn on_data_packet(&mut self, header: PacketHeader, kernel: &mut Kernel) {
        let block = match self
            .blocks
            .iter_mut()
            .find(|b| b.block_id == header.block_id)
        {
            Some(block) => block,
            None => {
                error!(self.log, "packet for unknown block"; "block_id" => header.block_id);
                self.counters.record(ErrorKind::StateViolation);
                return;
            }
        };

        match block.phase {
            WorkerBlockPhase::PipelineEstablished | WorkerBlockPhase::TransferInProgress => (),
            phase => {
                error!(self.log, "packet in invalid block state";
                       "block_id" => header.block_id, "phase" => ?phase);
                self.counters.record(ErrorKind::StateViolation);
                return;
            }
        }

        block.phase = WorkerBlockPhase::TransferInProgress;
        block.cur_packet_id = header.packet_id;
        block.cur_packet_size = header.packet_size;
        block.cur_last_packet = header.last_packet;
        block.bytes_rcvd = 0;
        block.packets_received += 1;

        trace!(self.log, "packet header";
               "block_id" => header.block_id,
               "packet_id" => header.packet_id,
               "size" => header.packet_size,
               "last" => header.last_packet);

        match block.conn_next {
            Some(next) => {
                // Relay the header onward; the successor switches its own
                // upstream direction into data-mode when it parses it.
                kernel.send(next, &PipeMsg::DataPacket(header).to_bytes());
            }
            None => {
                // Tail acknowledges on header receipt, before any payload
                // byte has drained.
                let prev = block.conn_prev;
                kernel.send(
                    prev,
                    &PipeMsg::PacketAck {
                        result: 0,
                        block_id: header.block_id,
                        packet_id: header.packet_id,
                        last_packet: header.last_packet,
                        packet_size: header.packet_size,
                    }
                    .to_bytes(),
                );
            }
        }
    }

    /// Opaque payload flowing through the upstream connection while it is in
    /// data-mode.
    fn on_data_chunk(&mut self, conn: ConnId, chunk: Vec<u8>, kernel: &mut Kernel) {
        let block = match self.blocks.iter_mut().find(|b| {
            b.conn_prev == conn && b.phase == WorkerBlockPhase::TransferInProgress
        }) {
            Some(block) => block,
            None => {
                error!(self.log, "payload bytes with no transfer in progress"; "conn" => conn);
                self.counters.record(ErrorKind::StateViolation);
                return;
            }
        };

        block.bytes_rcvd += chunk.len() as u32;

        if let Some(next) = block.conn_next {
            kernel.send(next, &chunk);
        }

        if block.bytes_rcvd == block.cur_packet_size && block.conn_next.is_none() {
            // Tail: the whole packet has drained through; complete it.
            let prev = block.conn_prev;
            let complete = PipeMsg::PacketComplete {
                result: 0,
                block_id: block.block_id,
                packet_id: block.cur_packet_id,
                last_packet: block.cur_last_packet,
                packet_size: block.cur_packet_size,
            };

            block.packets_completed += 1;
            if block.cur_last_packet {
                block.phase = WorkerBlockPhase::TransferCompleted;
                info!(self.log, "block transfer completed"; "block_id" => block.block_id);
            }

            kernel.send(prev, &complete.to_bytes());
        }
    }

    /// Messages flowing backward from the successor: the pipeline reply and
    /// per-packet acks/completions, all relayed toward the predecessor.
    fn on_backflow(&mut self, msg: PipeMsg, kernel: &mut Kernel) {
        match msg {
            PipeMsg::PipelineCreateRep { result, block_id } => {
                let block = match self.blocks.iter_mut().find(|b| b.block_id == block_id) {
                    Some(block) => block,
                    None => {
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }
                };

                if block.phase != WorkerBlockPhase::PipelineRequested {
                    error!(self.log, "pipeline reply in invalid state";
                           "block_id" => block_id, "phase" => ?block.phase);
                    self.counters.record(ErrorKind::StateViolation);
                    return;
                }

                block.phase = WorkerBlockPhase::PipelineEstablished;
                let prev = block.conn_prev;

                kernel.send(
                    prev,
                    &PipeMsg::PipelineCreateRep { result, block_id }.to_bytes(),
                );
            }
            PipeMsg::PacketAck { block_id, .. } | PipeMsg::PacketComplete { block_id, .. } => {
                let block = match self.blocks.iter_mut().find(|b| b.block_id == block_id) {
                    Some(block) => block,
                    None => {
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }
                };

                if block.phase != WorkerBlockPhase::TransferInProgress {
                    error!(self.log, "backflow in invalid state";
                           "block_id" => block_id, "phase" => ?block.phase);
                    self.counters.record(ErrorKind::StateViolation);
                    return;
                }

                let prev = block.conn_prev;
                let terminal = match &msg {
                    PipeMsg::PacketComplete { last_packet, .. } => {
                        block.packets_completed += 1;
                        *last_packet
                    }
                    _ => false,
                };

                if terminal {
                    // The final completion has passed through: this hop's
                    // work is done, so the forward connection can go.
                    block.phase = WorkerBlockPhase::TransferCompleted;
                    if let Some(next) = block.conn_next.take() {
                        kernel.close(next);
                        self.next_framers.remove(&next);
                    }
                    info!(self.log, "block transfer completed"; "block_id" => block_id);
                }

                kernel.send(prev, &msg.to_bytes());
            }
            other => {
                debug!(self.log, "unexpected backflow message"; "msg" => ?other);
                self.counters.record(ErrorKind::StateViolation);
            }
        }
    }

    fn on_prev_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        if let Some(framer) = self.prev_framers.get_mut(&conn) {
            framer.fill(kernel, conn);
        }

        loop {
            let pulled = match self.prev_framers.get_mut(&conn) {
                Some(framer) => framer.pull(),
                None => break,
            };

            match pulled {
                Ok(Inbound::Msg(PipeMsg::PipelineCreateReq { block_id, pipeline })) => {
                    self.on_pipeline_create(conn, block_id, pipeline, kernel)
                }
                Ok(Inbound::Msg(PipeMsg::DataPacket(header))) => {
                    self.on_data_packet(header, kernel)
                }
                Ok(Inbound::Msg(other)) => {
                    debug!(self.log, "unexpected upstream message"; "msg" => ?other);
                    self.counters.record(ErrorKind::StateViolation);
                }
                Ok(Inbound::Data(chunk)) => self.on_data_chunk(conn, chunk, kernel),
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message on upstream connection"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    self.prev_framers.remove(&conn);
                    kernel.close(conn);
                    break;
                }
            }
        }
    }

    fn on_next_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        if let Some(framer) = self.next_framers.get_mut(&conn) {
            framer.fill(kernel, conn);
        }

        loop {
            let pulled = match self.next_framers.get_mut(&conn) {
                Some(framer) => framer.pull(),
                None => break,
            };

            match pulled {
                Ok(Inbound::Msg(msg)) => self.on_backflow(msg, kernel),
                Ok(Inbound::Data(_)) => {
                    debug!(self.log, "payload bytes on backward direction"; "conn" => conn);
                    self.counters.record(ErrorKind::StateViolation);
                }
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message on downstream connection"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    self.next_framers.remove(&conn);
                    kernel.close(conn);
                    break;
                }
            }
        }
    }
}

impl Actor for Worker {
    fn on_event(&mut self, event: Event, kernel: &mut Kernel) {
        match event {
            Event::Start => {
                let listen_addr = Addr::new(self.ip, self.pipeline_port);
                self.listener =
                    Some(kernel.listen(listen_addr).expect("Pipeline endpoint bind failed"));

                self.coord_conn = Some(kernel.dial(self.coordinator));

                info!(self.log, "worker starting";
                      "listen" => %listen_addr, "coordinator" => %self.coordinator);
            }
            Event::Connected(conn) => {
                if self.coord_conn == Some(conn) {
                    let msg = ClusterMsg::RegisterReq {
                        pod: self.location.pod,
                        rack: self.location.rack,
                        host: self.location.host,
                        ip: self.ip,
                    };
                    kernel.send(conn, &msg.to_bytes());
                    return;
                }

                // A successor connection came up; forward the held request.
                match self
                    .blocks
                    .iter_mut()
                    .find(|b| b.conn_next == Some(conn) && b.pending_create.is_some())
                {
                    Some(block) => {
                        let pending = block.pending_create.take().unwrap();
                        kernel.send(conn, &pending);
                    }
                    None => {
                        debug!(self.log, "connected event with no pending pipeline"; "conn" => conn);
                        self.counters.record(ErrorKind::StateViolation);
                    }
                }
            }
            Event::ConnectFailed(conn) => {
                error!(self.log, "connect failed"; "conn" => conn);
                self.counters.record(ErrorKind::ConnectFailed);
            }
            Event::Accepted { listener, conn, .. } => {
                if Some(listener) == self.listener {
                    self.prev_framers.insert(conn, Framer::new());
                }
            }
            Event::Readable(conn) => {
                if self.coord_conn == Some(conn) {
                    self.on_coordinator_readable(conn, kernel);
                } else if self.prev_framers.contains_key(&conn) {
                    self.on_prev_readable(conn, kernel);
                } else if self.next_framers.contains_key(&conn) {
                    self.on_next_readable(conn, kernel);
                }
            }
            Event::Timer(_) => (),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
