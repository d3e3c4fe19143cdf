use crate::counters::{ErrorCounters, ErrorKind};
use crate::wire::{Framer, Inbound, Message, NameMsg, PacketHeader, PipeMsg, WireError};
use hashbrown::HashMap;
use slog::{debug, error, info, o, trace, Logger};
use std::any::Any;
use std::time::Duration;
use tempo::{Actor, Addr, ConnId, Event, Kernel, Token, VirtualTime};

const STOP_TOKEN: Token = Token::max_value();

/// Packet count and last-packet size for a block: full packets then the
/// remainder, with an evenly divisible block keeping a full-size last packet.
fn packet_plan(block_size: u32, packet_size: u32) -> (u32, u32) {
    let full = block_size / packet_size;
    let remainder = block_size % packet_size;

    if remainder == 0 {
        (full, packet_size)
    } else {
        (full + 1, remainder)
    }
}

/// One scheduled write: the file name, when to start, and how many blocks to
/// append.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub name: String,
    pub start: Duration,
    pub blocks: u32,
}

impl FileSpec {
    pub fn new<S: Into<String>>(name: S, start: Duration) -> FileSpec {
        FileSpec {
            name: name.into(),
            start,
            blocks: 1,
        }
    }

    pub fn with_blocks(mut self, blocks: u32) -> FileSpec {
        self.blocks = blocks;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub coordinator: Addr,
    pub worker_port: u16,
    pub packet_size: u32,
    pub max_files: usize,
    pub max_blocks: usize,
    /// When set, the client closes every connection at this offset and
    /// abandons outstanding blocks.
    pub stop: Option<Duration>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilePhase {
    Scheduled,
    RegistrationRequested,
    Registered,
    Completed,
}

pub struct ClientFile {
    pub name: String,
    pub file_id: u32,
    pub phase: FilePhase,
    pub blocks_total: u32,
    pub blocks_done: u32,
    start: Duration,
    pub completion_time: Option<VirtualTime>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientBlockPhase {
    RegistrationRequested,
    Registered,
    PipelineInitiated,
    PipelineEstablished,
    TransferInProgress,
    TransferCompleted,
}

pub struct ClientBlock {
    file_index: usize,
    pub block_id: u32,
    pub size: u32,
    pub pipeline: Vec<u32>,
    conn: Option<ConnId>,
    pub phase: ClientBlockPhase,

    pub total_packets: u32,
    pub last_packet_size: u32,
    pub packets_sent: u32,
    pub packets_acked: u32,
    pub packets_completed: u32,
    /// Bytes streamed on the head connection during the transfer: framed
    /// packet headers plus payload.
    pub bytes_streamed: u64,
    /// False if a completion ever arrived before its matching ack.
    pub ack_preceded_completion: bool,
}

/// The write orchestrator: registers files and blocks with the coordinator,
/// opens the pipeline to the head worker, streams packets, and reports block
/// completion. A new packet is issued only after the previous packet's
/// completion, which keeps completions strictly ordered.
pub struct Client {
    config: ClientConfig,

    coord_conn: Option<ConnId>,
    coord_framer: Framer<NameMsg>,
    coord_connected: bool,
    pending_files: Vec<usize>,

    files: Vec<ClientFile>,
    blocks: Vec<ClientBlock>,
    pipe_framers: HashMap<ConnId, Framer<PipeMsg>>,
    payload_scratch: Vec<u8>,
    stopped: bool,

    counters: ErrorCounters,
    log: Logger,
}

impl Client {
    pub fn new(config: ClientConfig, specs: Vec<FileSpec>, log: &Logger) -> Client {
        let mut counters = ErrorCounters::new();
        let log = log.new(o!("actor" => "client"));

        let mut files = Vec::new();
        for spec in specs {
            if files.len() >= config.max_files {
                error!(log, "file table full, dropping scheduled file"; "name" => %spec.name);
                counters.record(ErrorKind::CapacityExceeded);
                continue;
            }
            files.push(ClientFile {
                name: spec.name,
                file_id: 0,
                phase: FilePhase::Scheduled,
                blocks_total: spec.blocks,
                blocks_done: 0,
                start: spec.start,
                completion_time: None,
            });
        }

        let payload_scratch = vec![0u8; config.packet_size as usize];

        Client {
            config,
            coord_conn: None,
            coord_framer: Framer::new(),
            coord_connected: false,
            pending_files: Vec::new(),
            files,
            blocks: Vec::new(),
            pipe_framers: HashMap::new(),
            payload_scratch,
            stopped: false,
            counters,
            log,
        }
    }

    pub fn files(&self) -> &[ClientFile] {
        &self.files
    }

    pub fn blocks(&self) -> &[ClientBlock] {
        &self.blocks
    }

    pub fn block(&self, block_id: u32) -> Option<&ClientBlock> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    fn send_file_create(&mut self, file_index: usize, kernel: &mut Kernel) {
        let conn = match self.coord_conn {
            Some(conn) => conn,
            None => return,
        };

        let file = &mut self.files[file_index];
        file.phase = FilePhase::RegistrationRequested;

        info!(self.log, "registering file"; "name" => %file.name);

        kernel.send(
            conn,
            &NameMsg::FileCreateReq {
                name: file.name.clone(),
            }
            .to_bytes(),
        );
    }

    /// Allocates a local block entry and asks the coordinator for a block.
    /// Refused locally, without any message, when the block table is full.
    fn request_block(&mut self, file_index: usize, kernel: &mut Kernel) {
        if self.blocks.len() >= self.config.max_blocks {
            error!(self.log, "block table full, refusing block request";
                   "file" => %self.files[file_index].name,
                   "capacity" => self.config.max_blocks);
            self.counters.record(ErrorKind::CapacityExceeded);
            return;
        }

        let conn = match self.coord_conn {
            Some(conn) => conn,
            None => return,
        };

        let file_id = self.files[file_index].file_id;

        self.blocks.push(ClientBlock {
            file_index,
            block_id: 0,
            size: 0,
            pipeline: Vec::new(),
            conn: None,
            phase: ClientBlockPhase::RegistrationRequested,
            total_packets: 0,
            last_packet_size: 0,
            packets_sent: 0,
            packets_acked: 0,
            packets_completed: 0,
            bytes_streamed: 0,
            ack_preceded_completion: true,
        });

        kernel.send(conn, &NameMsg::BlockAddReq { file_id }.to_bytes());
    }

    fn on_coordinator_msg(&mut self, msg: NameMsg, kernel: &mut Kernel) {
        match msg {
            NameMsg::FileCreateRep {
                result,
                file_id,
                name,
            } => {
                let file_index = match self
                    .files
                    .iter()
                    .position(|f| f.name == name && f.phase == FilePhase::RegistrationRequested)
                {
                    Some(index) => index,
                    None => {
                        error!(self.log, "file reply does not match any request"; "name" => %name);
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }
                };

                if result != 0 {
                    error!(self.log, "file create rejected"; "name" => %name, "result" => result);
                    self.counters.record(ErrorKind::StateViolation);
                    return;
                }

                info!(self.log, "file registered"; "name" => %name, "file_id" => file_id);

                self.files[file_index].file_id = file_id;
                self.files[file_index].phase = FilePhase::Registered;

                self.request_block(file_index, kernel);
            }
            NameMsg::BlockAddRep {
                result,
                file_id,
                block_id,
                block_size,
                pipeline,
            } => {
                let files = &self.files;
                let block = match self.blocks.iter_mut().find(|b| {
                    b.phase == ClientBlockPhase::RegistrationRequested
                        && files[b.file_index].file_id == file_id
                }) {
                    Some(block) => block,
                    None => {
                        error!(self.log, "block reply does not match any request";
                               "file_id" => file_id);
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }
                };

                if result != 0 || pipeline.is_empty() {
                    error!(self.log, "block add rejected"; "file_id" => file_id);
                    self.counters.record(ErrorKind::StateViolation);
                    return;
                }

                debug!(self.log, "block assigned";
                       "block_id" => block_id,
                       "size" => block_size,
                       "pipeline_len" => pipeline.len());

                block.block_id = block_id;
                block.size = block_size;
                block.phase = ClientBlockPhase::Registered;

                let head = Addr::new(pipeline[0], self.config.worker_port);
                block.pipeline = pipeline;

                let conn = kernel.dial(head);
                block.conn = Some(conn);
                self.pipe_framers.insert(conn, Framer::new());
            }
            other => {
                debug!(self.log, "unexpected coordinator message"; "msg" => ?other);
                self.counters.record(ErrorKind::StateViolation);
            }
        }
    }

    /// Streams packet `packet_id` (1-indexed): the framed header, then the
    /// payload bytes on the same connection.
    fn send_packet(&mut self, block_index: usize, packet_id: u32, kernel: &mut Kernel) {
        let packet_size = self.config.packet_size;
        let block = &mut self.blocks[block_index];

        let conn = match block.conn {
            Some(conn) => conn,
            None => return,
        };

        let last_packet = packet_id == block.total_packets;
        let size = if last_packet {
            block.last_packet_size
        } else {
            packet_size
        };

        let header = PipeMsg::DataPacket(PacketHeader {
            block_id: block.block_id,
            packet_id,
            segment_id: 1,
            last_segment: true,
            last_packet,
            packet_size: size,
        });

        trace!(self.log, "sending packet";
               "block_id" => block.block_id,
               "packet_id" => packet_id,
               "size" => size,
               "last" => last_packet);

        let header_bytes = header.to_bytes();
        block.packets_sent += 1;
        block.bytes_streamed += (header_bytes.len() + size as usize) as u64;

        kernel.send(conn, &header_bytes);
        kernel.send(conn, &self.payload_scratch[..size as usize]);
    }

    fn on_pipeline_msg(&mut self, conn: ConnId, msg: PipeMsg, kernel: &mut Kernel) {
        match msg {
            PipeMsg::PipelineCreateRep { result, block_id } => {
                let block_index = match self.block_index_for(conn, block_id) {
                    Some(index) => index,
                    None => return,
                };

                {
                    let block = &mut self.blocks[block_index];
                    if block.phase != ClientBlockPhase::PipelineInitiated {
                        error!(self.log, "pipeline reply in invalid state";
                               "block_id" => block_id, "phase" => ?block.phase);
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }
                    if result != 0 {
                        error!(self.log, "pipeline create failed"; "block_id" => block_id);
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }

                    block.phase = ClientBlockPhase::PipelineEstablished;

                    let (total, last) = packet_plan(block.size, self.config.packet_size);
                    block.total_packets = total;
                    block.last_packet_size = last;

                    info!(self.log, "pipeline established, starting transfer";
                          "block_id" => block_id,
                          "total_packets" => block.total_packets,
                          "last_packet_size" => block.last_packet_size);

                    block.phase = ClientBlockPhase::TransferInProgress;
                }

                self.send_packet(block_index, 1, kernel);
            }
            PipeMsg::PacketAck {
                block_id,
                packet_id,
                ..
            } => {
                let block_index = match self.block_index_for(conn, block_id) {
                    Some(index) => index,
                    None => return,
                };
                let block = &mut self.blocks[block_index];

                if block.phase != ClientBlockPhase::TransferInProgress {
                    error!(self.log, "ack in invalid state";
                           "block_id" => block_id, "phase" => ?block.phase);
                    self.counters.record(ErrorKind::StateViolation);
                    return;
                }

                trace!(self.log, "packet acked"; "block_id" => block_id, "packet_id" => packet_id);
                block.packets_acked += 1;
            }
            PipeMsg::PacketComplete {
                block_id,
                packet_id,
                last_packet,
                ..
            } => {
                let block_index = match self.block_index_for(conn, block_id) {
                    Some(index) => index,
                    None => return,
                };

                {
                    let block = &mut self.blocks[block_index];

                    if block.phase != ClientBlockPhase::TransferInProgress {
                        error!(self.log, "completion in invalid state";
                               "block_id" => block_id, "phase" => ?block.phase);
                        self.counters.record(ErrorKind::StateViolation);
                        return;
                    }

                    block.packets_completed += 1;
                    if block.packets_acked < block.packets_completed {
                        block.ack_preceded_completion = false;
                    }
                }

                if !last_packet {
                    self.send_packet(block_index, packet_id + 1, kernel);
                    return;
                }

                // Last packet drained end to end: the block is done.
                let (file_index, done_block_id) = {
                    let block = &mut self.blocks[block_index];
                    block.phase = ClientBlockPhase::TransferCompleted;
                    (block.file_index, block.block_id)
                };

                info!(self.log, "block transfer completed"; "block_id" => done_block_id);

                if let Some(coord) = self.coord_conn {
                    kernel.send(
                        coord,
                        &NameMsg::BlockComplete {
                            result: 0,
                            block_id: done_block_id,
                        }
                        .to_bytes(),
                    );
                }

                let more = {
                    let file = &mut self.files[file_index];
                    file.blocks_done += 1;
                    if file.blocks_done < file.blocks_total {
                        true
                    } else {
                        file.phase = FilePhase::Completed;
                        file.completion_time = Some(kernel.now());
                        info!(self.log, "file completed"; "name" => %file.name);
                        false
                    }
                };

                if more {
                    self.request_block(file_index, kernel);
                }
            }
            other => {
                debug!(self.log, "unexpected pipeline message"; "msg" => ?other);
                self.counters.record(ErrorKind::StateViolation);
            }
        }
    }

    fn block_index_for(&mut self, conn: ConnId, block_id: u32) -> Option<usize> {
        let found = self
            .blocks
            .iter()
            .position(|b| b.conn == Some(conn) && b.block_id == block_id);

        if found.is_none() {
            error!(self.log, "message for unknown block";
                   "block_id" => block_id, "conn" => conn);
            self.counters.record(ErrorKind::StateViolation);
        }

        found
    }

    fn on_coordinator_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        self.coord_framer.fill(kernel, conn);

        loop {
            match self.coord_framer.pull() {
                Ok(Inbound::Msg(msg)) => self.on_coordinator_msg(msg, kernel),
                Ok(Inbound::Data(_)) => {
                    self.counters.record(ErrorKind::StateViolation);
                    break;
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

    fn on_pipeline_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        if let Some(framer) = self.pipe_framers.get_mut(&conn) {
            framer.fill(kernel, conn);
        }

        loop {
            let pulled = match self.pipe_framers.get_mut(&conn) {
                Some(framer) => framer.pull(),
                None => break,
            };

            match pulled {
                Ok(Inbound::Msg(msg)) => self.on_pipeline_msg(conn, msg, kernel),
                Ok(Inbound::Data(_)) => {
                    debug!(self.log, "payload bytes on client-bound direction"; "conn" => conn);
                    self.counters.record(ErrorKind::StateViolation);
                }
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message on pipeline connection"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    self.pipe_framers.remove(&conn);
                    kernel.close(conn);
                    break;
                }
            }
        }
    }

    /// Closes every connection and abandons outstanding blocks. No retries.
    fn stop(&mut self, kernel: &mut Kernel) {
        info!(self.log, "stop time reached, closing connections");
        self.stopped = true;

        if let Some(conn) = self.coord_conn.take() {
            kernel.close(conn);
        }
        for (conn, _) in self.pipe_framers.drain() {
            kernel.close(conn);
        }
        for block in &mut self.blocks {
            block.conn = None;
        }
    }
}

impl Actor for Client {
    fn on_event(&mut self, event: Event, kernel: &mut Kernel) {
        if self.stopped {
            return;
        }

        match event {
            Event::Start => {
                self.coord_conn = Some(kernel.dial(self.config.coordinator));

                for index in 0..self.files.len() {
                    kernel.schedule(self.files[index].start, index as Token);
                }
                if let Some(stop) = self.config.stop {
                    kernel.schedule(stop, STOP_TOKEN);
                }
            }
            Event::Timer(STOP_TOKEN) => self.stop(kernel),
            Event::Timer(token) => {
                let index = token as usize;
                if index >= self.files.len() {
                    return;
                }

                if self.coord_connected {
                    self.send_file_create(index, kernel);
                } else {
                    // The coordinator dial has not completed yet; flush on
                    // connect.
                    self.pending_files.push(index);
                }
            }
            Event::Connected(conn) => {
                if self.coord_conn == Some(conn) {
                    self.coord_connected = true;
                    let pending: Vec<usize> = self.pending_files.drain(..).collect();
                    for index in pending {
                        self.send_file_create(index, kernel);
                    }
                    return;
                }

                // A pipeline head connection came up.
                match self
                    .blocks
                    .iter_mut()
                    .find(|b| b.conn == Some(conn) && b.phase == ClientBlockPhase::Registered)
                {
                    Some(block) => {
                        block.phase = ClientBlockPhase::PipelineInitiated;
                        let msg = PipeMsg::PipelineCreateReq {
                            block_id: block.block_id,
                            pipeline: block.pipeline.clone(),
                        };
                        kernel.send(conn, &msg.to_bytes());
                    }
                    None => {
                        debug!(self.log, "connected event with no pending block"; "conn" => conn);
                        self.counters.record(ErrorKind::StateViolation);
                    }
                }
            }
            Event::ConnectFailed(conn) => {
                error!(self.log, "connect failed"; "conn" => conn);
                self.counters.record(ErrorKind::ConnectFailed);
            }
            Event::Readable(conn) => {
                if self.coord_conn == Some(conn) {
                    self.on_coordinator_readable(conn, kernel);
                } else if self.pipe_framers.contains_key(&conn) {
                    self.on_pipeline_readable(conn, kernel);
                }
            }
            Event::Accepted { .. } => (),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
