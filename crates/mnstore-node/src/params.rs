//! Replication tuning knobs.

use std::time::Duration;

use mnstore_types::{
    CHUNK_SIZE, DEFAULT_CHUNK_FETCH_PARALLELISM, DEFAULT_MAX_FETCH_ATTEMPTS,
    DEFAULT_REDUNDANCY_FACTOR, DEFAULT_REFETCH_COOLDOWN_SECS, DEFAULT_REPLICATION_FACTOR,
};

/// Parameters of the chunk manager, fetcher and auditor.
#[derive(Clone, Debug)]
pub struct ReplicationParams {
    pub replication_factor: usize,
    /// Missing chunks fetched per fetcher round.
    pub chunk_fetch_parallelism: usize,
    /// A chunk no owner could serve is skipped for this long.
    pub refetch_cooldown: Duration,
    pub max_fetch_attempts: u32,
    /// Bound on every outgoing RPC.
    pub fetch_timeout: Duration,
    /// Fountain redundancy for ingested artifacts.
    pub redundancy_factor: u32,
    /// Encoded block size, which is also the chunk size.
    pub chunk_size: usize,
    /// Chunks spot-checked per auditor round.
    pub audit_sample_size: usize,
}

impl Default for ReplicationParams {
    fn default() -> Self {
        Self {
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            chunk_fetch_parallelism: DEFAULT_CHUNK_FETCH_PARALLELISM,
            refetch_cooldown: Duration::from_secs(DEFAULT_REFETCH_COOLDOWN_SECS),
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            fetch_timeout: Duration::from_secs(30),
            redundancy_factor: DEFAULT_REDUNDANCY_FACTOR,
            chunk_size: CHUNK_SIZE,
            audit_sample_size: 1,
        }
    }
}

/// How often each background task runs.
#[derive(Clone, Debug)]
pub struct TaskIntervals {
    pub peer_refresh: Duration,
    pub ticket_poll: Duration,
    pub index: Duration,
    pub tmp_sweep: Duration,
    /// Fetcher pause when nothing is missing.
    pub fetcher_idle: Duration,
    pub audit: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            peer_refresh: Duration::from_secs(1),
            ticket_poll: Duration::from_secs(1),
            index: Duration::from_secs(1),
            tmp_sweep: Duration::from_secs(5),
            fetcher_idle: Duration::from_secs(10),
            audit: Duration::from_secs(60),
        }
    }
}
