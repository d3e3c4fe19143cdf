use clap::{App, Arg};
use nimbus::client::{Client, ClientBlockPhase, ClientConfig, FilePhase, FileSpec};
use nimbus::coordinator::Coordinator;
use nimbus::fabric::Topology;
use nimbus::worker::Worker;
use nimbus::RunConfig;
use serde_derive::Serialize;
use std::time::Duration;
use tempo::logging;
use tempo::{Addr, Sim};

#[derive(Serialize)]
struct FileSummary {
    name: String,
    file_id: u32,
    completed: bool,
    completion_time_us: Option<u64>,
}

#[derive(Serialize)]
struct BlockSummary {
    block_id: u32,
    size: u32,
    pipeline_len: usize,
    packets_completed: u32,
    completed: bool,
}

#[derive(Serialize)]
struct Summary {
    virtual_time_us: u64,
    workers_registered: usize,
    files: Vec<FileSummary>,
    blocks: Vec<BlockSummary>,
    client_errors: u64,
    coordinator_errors: u64,
}

fn main() {
    let matches = App::new("Fat-tree HDFS write simulation")
        .version("0.1")
        .about("Runs a coordinator, storage workers and a client on a virtual fat-tree.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the scenario config file (TOML)")
                .required(false),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => RunConfig::load(path),
        None => RunConfig::default(),
    };

    let log = logging::init_with_level(&config.sim.log_level);

    let sim_config = &config.sim;
    let topo = Topology::build(sim_config.fat_tree_k);
    let base = sim_config.address_base;

    logging::info!(log, "topology built";
                   "k" => topo.k(),
                   "hosts" => topo.host_count(),
                   "core_switches" => topo.core_count());

    let hosts = topo.hosts();
    let worker_count = config.scenario.worker_count as usize;
    assert!(
        worker_count + 2 <= hosts.len(),
        "Scenario needs {} hosts, the fat-tree has {}",
        worker_count + 2,
        hosts.len()
    );

    let mut sim = Sim::new(sim_config.link_latency(), log.clone());

    // Coordinator on the first host, workers on the following ones, the
    // client after those.
    let coord_ip = topo.host_ip(hosts[0], base);
    let coordinator_id = sim.add_actor(Box::new(Coordinator::new(coord_ip, sim_config, &log)));

    let worker_endpoint = Addr::new(coord_ip, sim_config.coordinator_worker_port);
    let client_endpoint = Addr::new(coord_ip, sim_config.coordinator_client_port);

    for index in 0..worker_count {
        let loc = hosts[1 + index];
        let ip = topo.host_ip(loc, base);
        sim.add_actor(Box::new(
            Worker::new(loc, ip, sim_config, &log).with_coordinator(worker_endpoint),
        ));
    }

    let specs: Vec<FileSpec> = config
        .scenario
        .files
        .iter()
        .map(|entry| {
            FileSpec::new(entry.name.clone(), Duration::from_millis(entry.start_ms))
                .with_blocks(entry.blocks)
        })
        .collect();

    let client_config = ClientConfig {
        coordinator: client_endpoint,
        worker_port: sim_config.worker_pipeline_port,
        packet_size: sim_config.packet_size,
        max_files: sim_config.max_files_per_client,
        max_blocks: sim_config.max_blocks_per_client,
        stop: config.scenario.stop_ms.map(Duration::from_millis),
    };
    let client_id = sim.add_actor(Box::new(Client::new(client_config, specs, &log)));

    logging::info!(log, "simulation starting"; "workers" => worker_count);
    sim.run();
    logging::info!(log, "simulation drained"; "virtual_time" => %sim.now());

    let client = sim.actor::<Client>(client_id).expect("Client vanished");
    let coordinator = sim
        .actor::<Coordinator>(coordinator_id)
        .expect("Coordinator vanished");

    let summary = Summary {
        virtual_time_us: sim.now().as_micros(),
        workers_registered: coordinator.worker_count(),
        files: client
            .files()
            .iter()
            .map(|file| FileSummary {
                name: file.name.clone(),
                file_id: file.file_id,
                completed: file.phase == FilePhase::Completed,
                completion_time_us: file.completion_time.map(|t| t.as_micros()),
            })
            .collect(),
        blocks: client
            .blocks()
            .iter()
            .map(|block| BlockSummary {
                block_id: block.block_id,
                size: block.size,
                pipeline_len: block.pipeline.len(),
                packets_completed: block.packets_completed,
                completed: block.phase == ClientBlockPhase::TransferCompleted,
            })
            .collect(),
        client_errors: client.counters().total(),
        coordinator_errors: coordinator.counters().total(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("Error serializing summary")
    );
}
