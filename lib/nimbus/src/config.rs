use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Knobs the core consumes. Defaults mirror the cluster's well-known values;
/// a TOML file can override any subset.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SimConfig {
    /// Fat-tree parameter K: pods, and ports per switch.
    pub fat_tree_k: u32,
    /// Top byte of every fat-tree endpoint address.
    pub address_base: u8,
    /// Bulk-data packet payload size in bytes.
    pub packet_size: u32,
    /// Replica count, which is also the pipeline depth.
    pub max_pipeline_len: u32,
    /// Block size handed out by the coordinator.
    pub default_block_size: u32,

    pub coordinator_worker_port: u16,
    pub coordinator_client_port: u16,
    pub worker_pipeline_port: u16,

    pub max_workers: usize,
    pub max_blocks_per_worker: usize,
    pub max_files_per_client: usize,
    pub max_blocks_per_client: usize,

    /// One-way delivery delay of the virtual links, in microseconds.
    pub link_latency_us: u64,
    /// Root logger level for the runner.
    pub log_level: String,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            fat_tree_k: 4,
            address_base: 10,
            packet_size: 1000,
            max_pipeline_len: 3,
            default_block_size: 64_000,
            coordinator_worker_port: 8000,
            coordinator_client_port: 9000,
            worker_pipeline_port: 9002,
            max_workers: 64,
            max_blocks_per_worker: 16,
            max_files_per_client: 10,
            max_blocks_per_client: 16,
            link_latency_us: 50,
            log_level: "info".to_string(),
        }
    }
}

impl SimConfig {
    #[inline]
    pub fn link_latency(&self) -> Duration {
        Duration::from_micros(self.link_latency_us)
    }
}

/// One scheduled client write in a scenario file.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct FileEntry {
    pub name: String,
    pub start_ms: u64,
    pub blocks: u32,
}

impl Default for FileEntry {
    fn default() -> FileEntry {
        FileEntry {
            name: "part-000".to_string(),
            start_ms: 10,
            blocks: 1,
        }
    }
}

/// What the runner deploys on the topology: how many workers, which files
/// the client writes, and an optional client stop time.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Scenario {
    pub worker_count: u32,
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_ms: Option<u64>,
}

impl Default for Scenario {
    fn default() -> Scenario {
        Scenario {
            worker_count: 3,
            files: vec![FileEntry::default()],
            stop_ms: None,
        }
    }
}

/// A full run description: the core knobs plus the deployed scenario.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct RunConfig {
    pub sim: SimConfig,
    pub scenario: Scenario,
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> RunConfig {
        serdeconv::from_toml_file(path).expect("Error loading scenario configuration file")
    }
}
