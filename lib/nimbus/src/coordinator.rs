use crate::config::SimConfig;
use crate::counters::{ErrorCounters, ErrorKind};
use crate::fabric::HostLoc;
use crate::wire::{ClusterMsg, Framer, Inbound, Message, NameMsg, WireError};
use hashbrown::HashMap;
use indexmap::IndexMap;
use slog::{debug, error, info, o, trace, Logger};
use std::any::Any;
use tempo::{Actor, Addr, ConnId, Event, Kernel, ListenerId};

/// Replica placement seam. The shipped policy is registration-order FIFO;
/// a rack-aware policy can be substituted without touching the coordinator's
/// message handling.
pub trait Placement {
    /// Picks up to `replicas` worker IPs out of the registry, which is
    /// ordered by registration time.
    fn choose(&self, registered: &[u32], replicas: usize) -> Vec<u32>;
}

/// Takes the first `replicas` workers in registration order. The reported
/// fat-tree locations are deliberately ignored.
pub struct FifoPlacement;

impl Placement for FifoPlacement {
    fn choose(&self, registered: &[u32], replicas: usize) -> Vec<u32> {
        registered[..usize::min(replicas, registered.len())].to_vec()
    }
}

/// A worker known to the coordinator. The IP recorded here is the only IP
/// ever handed out in a pipeline.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub placement: HostLoc,
    pub ip: u32,
    conn: ConnId,
}

impl WorkerRecord {
    /// The control connection the worker registered over.
    #[inline]
    pub fn control_conn(&self) -> ConnId {
        self.conn
    }
}

/// One file in the namespace. Names are opaque and not checked for
/// uniqueness.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_id: u32,
    pub name: String,
    pub blocks: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub block_id: u32,
    pub file_id: u32,
    pub size: u32,
    /// Ordered replica pipeline; immutable once assigned.
    pub pipeline: Vec<u32>,
    pub completed: bool,
}

/// The single point of truth for file-to-block and block-to-placement
/// mapping. Listens on one worker-facing and one client-facing endpoint;
/// all state mutation happens inside this actor.
pub struct Coordinator {
    ip: u32,
    worker_port: u16,
    client_port: u16,
    max_workers: usize,
    max_pipeline_len: usize,
    default_block_size: u32,

    placement: Box<dyn Placement>,

    workers: IndexMap<u32, WorkerRecord>,
    files: Vec<FileRecord>,
    blocks: Vec<BlockRecord>,
    next_file_id: u32,
    next_block_id: u32,

    worker_listener: Option<ListenerId>,
    client_listener: Option<ListenerId>,
    worker_conns: HashMap<ConnId, Framer<ClusterMsg>>,
    client_conns: HashMap<ConnId, Framer<NameMsg>>,

    counters: ErrorCounters,
    log: Logger,
}

impl Coordinator {
    pub fn new(ip: u32, config: &SimConfig, log: &Logger) -> Coordinator {
        Coordinator::with_placement(ip, config, Box::new(FifoPlacement), log)
    }

    pub fn with_placement(
        ip: u32,
        config: &SimConfig,
        placement: Box<dyn Placement>,
        log: &Logger,
    ) -> Coordinator {
        Coordinator {
            ip,
            worker_port: config.coordinator_worker_port,
            client_port: config.coordinator_client_port,
            max_workers: config.max_workers,
            max_pipeline_len: config.max_pipeline_len as usize,
            default_block_size: config.default_block_size,
            placement,
            workers: IndexMap::new(),
            files: Vec::new(),
            blocks: Vec::new(),
            next_file_id: 1,
            next_block_id: 1,
            worker_listener: None,
            client_listener: None,
            worker_conns: HashMap::new(),
            client_conns: HashMap::new(),
            counters: ErrorCounters::new(),
            log: log.new(o!("actor" => "coordinator")),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Registered worker IPs in registration order.
    pub fn worker_ips(&self) -> Vec<u32> {
        self.workers.keys().cloned().collect()
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.blocks
    }

    pub fn block(&self, block_id: u32) -> Option<&BlockRecord> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    fn on_worker_msg(&mut self, conn: ConnId, msg: ClusterMsg, kernel: &mut Kernel) {
        match msg {
            ClusterMsg::RegisterReq {
                pod,
                rack,
                host,
                ip,
            } => {
                if self.workers.len() >= self.max_workers {
                    error!(self.log, "worker registry full, dropping registration";
                           "ip" => ip, "capacity" => self.max_workers);
                    self.counters.record(ErrorKind::CapacityExceeded);
                    return;
                }

                info!(self.log, "worker registered";
                      "ip" => ip, "pod" => pod, "rack" => rack, "host" => host);

                self.workers.insert(
                    ip,
                    WorkerRecord {
                        placement: HostLoc::new(pod, rack, host),
                        ip,
                        conn,
                    },
                );

                kernel.send(conn, &ClusterMsg::RegisterRep { result: 0 }.to_bytes());
            }
            ClusterMsg::RegisterRep { .. } => {
                debug!(self.log, "unexpected register reply from worker");
                self.counters.record(ErrorKind::StateViolation);
            }
        }
    }

    fn on_client_msg(&mut self, conn: ConnId, msg: NameMsg, kernel: &mut Kernel) {
        match msg {
            NameMsg::FileCreateReq { name } => {
                let file_id = self.next_file_id;
                self.next_file_id += 1;

                info!(self.log, "file created"; "file_id" => file_id, "name" => %name);

                self.files.push(FileRecord {
                    file_id,
                    name: name.clone(),
                    blocks: Vec::new(),
                });

                kernel.send(
                    conn,
                    &NameMsg::FileCreateRep {
                        result: 0,
                        file_id,
                        name,
                    }
                    .to_bytes(),
                );
            }
            NameMsg::BlockAddReq { file_id } => self.add_block(conn, file_id, kernel),
            NameMsg::BlockComplete { block_id, .. } => {
                match self.blocks.iter_mut().find(|b| b.block_id == block_id) {
                    Some(block) => {
                        block.completed = true;
                        info!(self.log, "block completed"; "block_id" => block_id);
                    }
                    None => {
                        error!(self.log, "completion for unknown block"; "block_id" => block_id);
                        self.counters.record(ErrorKind::StateViolation);
                    }
                }
            }
            other => {
                debug!(self.log, "unexpected client message"; "msg" => ?other);
                self.counters.record(ErrorKind::StateViolation);
            }
        }
    }

    fn add_block(&mut self, conn: ConnId, file_id: u32, kernel: &mut Kernel) {
        let file = match self.files.iter_mut().find(|f| f.file_id == file_id) {
            Some(file) => file,
            None => {
                error!(self.log, "block add for unknown file"; "file_id" => file_id);
                self.counters.record(ErrorKind::StateViolation);
                return;
            }
        };

        let registered: Vec<u32> = self.workers.keys().cloned().collect();
        let pipeline = self.placement.choose(&registered, self.max_pipeline_len);

        if pipeline.is_empty() {
            error!(self.log, "no workers registered, dropping block add";
                   "file_id" => file_id);
            self.counters.record(ErrorKind::StateViolation);
            return;
        }

        let block_id = self.next_block_id;
        self.next_block_id += 1;
        file.blocks.push(block_id);

        let size = self.default_block_size;

        info!(self.log, "block assigned";
              "block_id" => block_id,
              "file_id" => file_id,
              "size" => size,
              "pipeline_len" => pipeline.len());

        self.blocks.push(BlockRecord {
            block_id,
            file_id,
            size,
            pipeline: pipeline.clone(),
            completed: false,
        });

        kernel.send(
            conn,
            &NameMsg::BlockAddRep {
                result: 0,
                file_id,
                block_id,
                block_size: size,
                pipeline,
            }
            .to_bytes(),
        );
    }

    fn on_worker_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        if let Some(framer) = self.worker_conns.get_mut(&conn) {
            framer.fill(kernel, conn);
        }

        loop {
            let pulled = match self.worker_conns.get_mut(&conn) {
                Some(framer) => framer.pull(),
                None => break,
            };

            match pulled {
                Ok(Inbound::Msg(msg)) => self.on_worker_msg(conn, msg, kernel),
                Ok(Inbound::Data(_)) => {
                    self.counters.record(ErrorKind::StateViolation);
                    break;
                }
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message on worker connection"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    self.worker_conns.remove(&conn);
                    kernel.close(conn);
                    break;
                }
            }
        }
    }

    fn on_client_readable(&mut self, conn: ConnId, kernel: &mut Kernel) {
        if let Some(framer) = self.client_conns.get_mut(&conn) {
            framer.fill(kernel, conn);
        }

        loop {
            let pulled = match self.client_conns.get_mut(&conn) {
                Some(framer) => framer.pull(),
                None => break,
            };

            match pulled {
                Ok(Inbound::Msg(msg)) => self.on_client_msg(conn, msg, kernel),
                Ok(Inbound::Data(_)) => {
                    self.counters.record(ErrorKind::StateViolation);
                    break;
                }
                Err(WireError::Wait) => break,
                Err(err) => {
                    error!(self.log, "bad message on client connection"; "err" => ?err);
                    self.counters.record(ErrorKind::UnknownMessage);
                    self.client_conns.remove(&conn);
                    kernel.close(conn);
                    break;
                }
            }
        }
    }
}

impl Actor for Coordinator {
    fn on_event(&mut self, event: Event, kernel: &mut Kernel) {
        match event {
            Event::Start => {
                let worker_addr = Addr::new(self.ip, self.worker_port);
                let client_addr = Addr::new(self.ip, self.client_port);

                self.worker_listener =
                    Some(kernel.listen(worker_addr).expect("Worker endpoint bind failed"));
                self.client_listener =
                    Some(kernel.listen(client_addr).expect("Client endpoint bind failed"));

                info!(self.log, "coordinator listening";
                      "workers" => %worker_addr, "clients" => %client_addr);
            }
            Event::Accepted { listener, conn, peer } => {
                trace!(self.log, "accepted connection"; "peer" => %peer, "conn" => conn);

                if Some(listener) == self.worker_listener {
                    self.worker_conns.insert(conn, Framer::new());
                } else if Some(listener) == self.client_listener {
                    self.client_conns.insert(conn, Framer::new());
                }
            }
            Event::Readable(conn) => {
                if self.worker_conns.contains_key(&conn) {
                    self.on_worker_readable(conn, kernel);
                } else if self.client_conns.contains_key(&conn) {
                    self.on_client_readable(conn, kernel);
                }
            }
            Event::Timer(_) | Event::Connected(_) | Event::ConnectFailed(_) => {
                trace!(self.log, "ignoring event"; "event" => ?event);
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
