//! End-to-end write-path scenarios: a coordinator, a handful of storage
//! workers, and a client placed on a K=4 fat-tree, run to quiescence on the
//! event kernel.

use nimbus::client::{Client, ClientBlockPhase, ClientConfig, FilePhase, FileSpec};
use nimbus::coordinator::Coordinator;
use nimbus::fabric::Topology;
use nimbus::worker::{Worker, WorkerBlockPhase};
use nimbus::{ErrorKind, SimConfig};
use std::time::Duration;
use tempo::{logging, ActorId, Addr, Sim};

const BASE: u8 = 10;

struct Cluster {
    sim: Sim,
    coordinator: ActorId,
    workers: Vec<ActorId>,
    client: ActorId,
    worker_ips: Vec<u32>,
}

/// Places the coordinator on host 0, `worker_count` workers on the following
/// hosts, and one client after those, then runs to quiescence.
fn run_cluster(
    config: &SimConfig,
    worker_count: usize,
    files: Vec<FileSpec>,
    stop: Option<Duration>,
) -> Cluster {
    let topo = Topology::build(config.fat_tree_k);
    let log = logging::discard();
    let mut sim = Sim::new(config.link_latency(), log.clone());

    let hosts = topo.hosts();
    assert!(worker_count + 2 <= hosts.len());

    let coord_ip = topo.host_ip(hosts[0], BASE);
    let coordinator = sim.add_actor(Box::new(Coordinator::new(coord_ip, config, &log)));

    let worker_endpoint = Addr::new(coord_ip, config.coordinator_worker_port);
    let client_endpoint = Addr::new(coord_ip, config.coordinator_client_port);

    let mut workers = Vec::new();
    let mut worker_ips = Vec::new();
    for index in 0..worker_count {
        let loc = hosts[1 + index];
        let ip = topo.host_ip(loc, BASE);
        worker_ips.push(ip);
        workers.push(sim.add_actor(Box::new(
            Worker::new(loc, ip, config, &log).with_coordinator(worker_endpoint),
        )));
    }

    let client_config = ClientConfig {
        coordinator: client_endpoint,
        worker_port: config.worker_pipeline_port,
        packet_size: config.packet_size,
        max_files: config.max_files_per_client,
        max_blocks: config.max_blocks_per_client,
        stop,
    };
    let client = sim.add_actor(Box::new(Client::new(client_config, files, &log)));

    sim.run();

    Cluster {
        sim,
        coordinator,
        workers,
        client,
        worker_ips,
    }
}

fn start_at_10ms(name: &str) -> Vec<FileSpec> {
    vec![FileSpec::new(name, Duration::from_millis(10))]
}

#[test]
fn test_single_packet_block() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;

    let cluster = run_cluster(&config, 3, start_at_10ms("part-000"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.files().len(), 1);
    assert_eq!(client.files()[0].phase, FilePhase::Completed);

    assert_eq!(client.blocks().len(), 1);
    let block = &client.blocks()[0];
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);
    assert_eq!(block.total_packets, 1);
    assert_eq!(block.last_packet_size, 500);
    assert_eq!(block.packets_sent, 1);
    assert_eq!(block.packets_acked, 1);
    assert_eq!(block.packets_completed, 1);
    assert_eq!(block.pipeline, cluster.worker_ips);
    assert!(block.ack_preceded_completion);
    assert_eq!(client.counters().total(), 0);

    // One pipeline-create pair propagated through all three workers; every
    // worker drove the block to completion.
    for worker_id in &cluster.workers {
        let worker = cluster.sim.actor::<Worker>(*worker_id).unwrap();
        assert!(worker.is_registered());
        let state = worker.block(block.block_id).unwrap();
        assert_eq!(state.phase, WorkerBlockPhase::TransferCompleted);
        assert_eq!(state.packets_received, 1);
        assert_eq!(worker.counters().total(), 0);
    }

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    assert_eq!(coordinator.worker_count(), 3);
    assert_eq!(coordinator.files().len(), 1);
    assert_eq!(coordinator.files()[0].blocks, vec![block.block_id]);
    assert!(coordinator.block(block.block_id).unwrap().completed);
}

#[test]
fn test_three_packet_block_with_remainder() {
    let mut config = SimConfig::default();
    config.default_block_size = 2500;

    let cluster = run_cluster(&config, 3, start_at_10ms("part-001"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];

    // Headers (1,1000,false), (2,1000,false), (3,500,true).
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);
    assert_eq!(block.total_packets, 3);
    assert_eq!(block.last_packet_size, 500);
    assert_eq!(block.packets_sent, 3);
    assert_eq!(block.packets_acked, 3);
    assert_eq!(block.packets_completed, 3);
    assert!(block.ack_preceded_completion);
}

#[test]
fn test_exactly_divisible_block() {
    let mut config = SimConfig::default();
    config.default_block_size = 3000;

    let cluster = run_cluster(&config, 3, start_at_10ms("part-002"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];

    assert_eq!(block.total_packets, 3);
    assert_eq!(block.last_packet_size, 1000);
    assert_eq!(block.packets_completed, 3);
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);
}

#[test]
fn test_pipeline_length_two() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;
    config.max_pipeline_len = 2;

    let cluster = run_cluster(&config, 3, start_at_10ms("part-003"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];
    assert_eq!(block.pipeline.len(), 2);
    assert_eq!(block.pipeline, cluster.worker_ips[..2].to_vec());
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);

    // The third worker never saw the block.
    let spare = cluster.sim.actor::<Worker>(cluster.workers[2]).unwrap();
    assert!(spare.block(block.block_id).is_none());

    // Head and tail both completed it.
    for worker_id in &cluster.workers[..2] {
        let worker = cluster.sim.actor::<Worker>(*worker_id).unwrap();
        assert_eq!(
            worker.block(block.block_id).unwrap().phase,
            WorkerBlockPhase::TransferCompleted
        );
    }
}

#[test]
fn test_pipeline_length_one_tail_is_head() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;
    config.max_pipeline_len = 1;

    let cluster = run_cluster(&config, 2, start_at_10ms("part-004"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];
    assert_eq!(block.pipeline.len(), 1);
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);

    let head = cluster.sim.actor::<Worker>(cluster.workers[0]).unwrap();
    let state = head.block(block.block_id).unwrap();
    assert_eq!(state.phase, WorkerBlockPhase::TransferCompleted);
    assert_eq!(state.packets_completed, 1);
}

#[test]
fn test_head_connection_byte_accounting() {
    let mut config = SimConfig::default();
    config.default_block_size = 2500;

    let cluster = run_cluster(&config, 3, start_at_10ms("part-005"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];

    // Block payload plus one framed 24-byte header (4-byte discriminator
    // included) per packet.
    let header_wire_size = 28;
    assert_eq!(
        block.bytes_streamed,
        2500 + block.total_packets as u64 * header_wire_size
    );
}

#[test]
fn test_default_block_is_sixty_four_packets() {
    let config = SimConfig::default();

    let cluster = run_cluster(&config, 3, start_at_10ms("part-006"), None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    let block = &client.blocks()[0];
    assert_eq!(block.size, 64_000);
    assert_eq!(block.total_packets, 64);
    assert_eq!(block.last_packet_size, 1000);
    assert_eq!(block.packets_completed, 64);
    assert_eq!(block.phase, ClientBlockPhase::TransferCompleted);
}

#[test]
fn test_multi_file_ids_monotonic() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;

    let files = vec![
        FileSpec::new("alpha", Duration::from_millis(10)),
        FileSpec::new("beta", Duration::from_millis(30)),
    ];
    let cluster = run_cluster(&config, 3, files, None);

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    let ids: Vec<u32> = coordinator.files().iter().map(|f| f.file_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let block_ids: Vec<u32> = coordinator.blocks().iter().map(|b| b.block_id).collect();
    assert_eq!(block_ids, vec![1, 2]);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert!(client
        .files()
        .iter()
        .all(|f| f.phase == FilePhase::Completed));
}

#[test]
fn test_multi_block_file() {
    let mut config = SimConfig::default();
    config.default_block_size = 1500;

    let files = vec![FileSpec::new("chunked", Duration::from_millis(10)).with_blocks(3)];
    let cluster = run_cluster(&config, 3, files, None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.files()[0].phase, FilePhase::Completed);
    assert_eq!(client.files()[0].blocks_done, 3);
    assert_eq!(client.blocks().len(), 3);
    assert!(client
        .blocks()
        .iter()
        .all(|b| b.phase == ClientBlockPhase::TransferCompleted));

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    assert_eq!(coordinator.files()[0].blocks, vec![1, 2, 3]);
}

#[test]
fn test_block_table_capacity_refusal() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;

    // Seventeen scheduled blocks against a table of sixteen: the seventeenth
    // request is refused locally and never reaches the coordinator.
    let files = vec![FileSpec::new("big", Duration::from_millis(10)).with_blocks(17)];
    let cluster = run_cluster(&config, 3, files, None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.blocks().len(), 16);
    assert!(client
        .blocks()
        .iter()
        .all(|b| b.phase == ClientBlockPhase::TransferCompleted));
    assert_eq!(client.counters().get(ErrorKind::CapacityExceeded), 1);
    assert_eq!(client.files()[0].blocks_done, 16);
    assert_ne!(client.files()[0].phase, FilePhase::Completed);

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    assert_eq!(coordinator.blocks().len(), 16);
}

#[test]
fn test_placement_is_registration_order_prefix() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;

    let cluster = run_cluster(&config, 5, start_at_10ms("part-007"), None);

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    assert_eq!(coordinator.worker_count(), 5);
    assert_eq!(coordinator.worker_ips(), cluster.worker_ips);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.blocks()[0].pipeline, cluster.worker_ips[..3].to_vec());
}

#[test]
fn test_worker_block_table_overflow_drops_pipeline() {
    let mut config = SimConfig::default();
    config.default_block_size = 500;
    config.max_blocks_per_worker = 2;

    // Three blocks through the same three workers: the third pipeline-create
    // is dropped at the head, so the third block never establishes.
    let files = vec![FileSpec::new("trickle", Duration::from_millis(10)).with_blocks(3)];
    let cluster = run_cluster(&config, 3, files, None);

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.blocks().len(), 3);
    assert_eq!(
        client
            .blocks()
            .iter()
            .filter(|b| b.phase == ClientBlockPhase::TransferCompleted)
            .count(),
        2
    );
    assert_ne!(client.files()[0].phase, FilePhase::Completed);

    let head = cluster.sim.actor::<Worker>(cluster.workers[0]).unwrap();
    assert_eq!(head.blocks().len(), 2);
    assert_eq!(head.counters().get(ErrorKind::CapacityExceeded), 1);
}

/// Dials a worker's pipeline endpoint directly and offers it a pipeline
/// vector it does not belong to.
struct RoguePeer {
    target: Addr,
    conn: Option<tempo::ConnId>,
}

impl tempo::Actor for RoguePeer {
    fn on_event(&mut self, event: tempo::Event, kernel: &mut tempo::Kernel) {
        use nimbus::wire::{Message, PipeMsg};

        match event {
            tempo::Event::Start => {
                self.conn = Some(kernel.dial(self.target));
            }
            tempo::Event::Connected(conn) => {
                let msg = PipeMsg::PipelineCreateReq {
                    block_id: 77,
                    pipeline: vec![1, 2, 3],
                };
                kernel.send(conn, &msg.to_bytes());
            }
            _ => (),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[test]
fn test_self_ip_missing_from_pipeline_is_dropped() {
    let config = SimConfig::default();
    let topo = Topology::build(config.fat_tree_k);
    let log = logging::discard();
    let mut sim = Sim::new(config.link_latency(), log.clone());

    let hosts = topo.hosts();
    let coord_ip = topo.host_ip(hosts[0], BASE);
    sim.add_actor(Box::new(Coordinator::new(coord_ip, &config, &log)));

    let worker_ip = topo.host_ip(hosts[1], BASE);
    let worker_id = sim.add_actor(Box::new(
        Worker::new(hosts[1], worker_ip, &config, &log)
            .with_coordinator(Addr::new(coord_ip, config.coordinator_worker_port)),
    ));

    sim.add_actor(Box::new(RoguePeer {
        target: Addr::new(worker_ip, config.worker_pipeline_port),
        conn: None,
    }));

    sim.run();

    // The pipeline is dropped without a reply and without block state.
    let worker = sim.actor::<Worker>(worker_id).unwrap();
    assert!(worker.blocks().is_empty());
    assert_eq!(worker.counters().get(ErrorKind::SelfNotInPipeline), 1);
}

#[test]
fn test_connect_failed_is_counted() {
    let config = SimConfig::default();
    let topo = Topology::build(config.fat_tree_k);
    let log = logging::discard();
    let mut sim = Sim::new(config.link_latency(), log.clone());

    let hosts = topo.hosts();
    let worker_ip = topo.host_ip(hosts[1], BASE);

    // No coordinator is running; the registration dial must fail.
    let worker_id = sim.add_actor(Box::new(
        Worker::new(hosts[1], worker_ip, &config, &log)
            .with_coordinator(Addr::new(topo.host_ip(hosts[0], BASE), 8000)),
    ));

    sim.run();

    let worker = sim.actor::<Worker>(worker_id).unwrap();
    assert!(!worker.is_registered());
    assert_eq!(worker.counters().get(ErrorKind::ConnectFailed), 1);
}

#[test]
fn test_stop_abandons_outstanding_blocks() {
    let mut config = SimConfig::default();
    // A long transfer, cut short shortly after it starts.
    config.default_block_size = 64_000;

    let cluster = run_cluster(
        &config,
        3,
        start_at_10ms("doomed"),
        Some(Duration::from_millis(11)),
    );

    let client = cluster.sim.actor::<Client>(cluster.client).unwrap();
    assert_eq!(client.blocks().len(), 1);
    assert_ne!(
        client.blocks()[0].phase,
        ClientBlockPhase::TransferCompleted
    );

    let coordinator = cluster.sim.actor::<Coordinator>(cluster.coordinator).unwrap();
    assert!(!coordinator.blocks().is_empty());
    assert!(!coordinator.blocks()[0].completed);
}
