use crate::spawn::SpawnSearch;
use blobfield_shared::config::GameplayConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Spore pool and replenishment settings
#[derive(Debug, Clone)]
pub struct SporeConfig {
    /// Size of the pool seeded at startup and topped up afterwards
    pub pool_size: usize,
    pub replenish_interval: Duration,
    /// Spores added per replenish round at most
    pub replenish_max_per_round: usize,
    /// Pause between two spores of one round
    pub replenish_pause: Duration,
    pub radius_mean: f64,
    /// Standard deviation of the normally distributed radius
    pub radius_spread: f64,
    /// Floor applied after drawing the radius
    pub radius_min: f64,
    /// Spores per batch when streaming the pool to a newly joined player
    pub stream_batch_size: usize,
    /// Pause between two batches of the initial stream
    pub stream_batch_pause: Duration,
}

impl Default for SporeConfig {
    fn default() -> Self {
        Self {
            pool_size: 1000,
            replenish_interval: Duration::from_secs(5),
            replenish_max_per_round: 10,
            replenish_pause: Duration::from_millis(100),
            radius_mean: 10.0,
            radius_spread: 3.0,
            radius_min: 5.0,
            stream_batch_size: 20,
            stream_batch_pause: Duration::from_millis(50),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Per-connection queue of frames waiting for the socket
    pub outbound_capacity: usize,
    /// Per-connection queue of hub and peer deliveries waiting for dispatch
    pub inbox_capacity: usize,
    /// Capacity of each of the hub's three channels
    pub hub_channel_capacity: usize,
    pub rng_seed: u64,
    pub accounts_path: PathBuf,
    pub bcrypt_cost: u32,
    pub spawn: SpawnSearch,
    pub spores: SporeConfig,
    pub gameplay: GameplayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            outbound_capacity: 256,
            inbox_capacity: 256,
            hub_channel_capacity: 256,
            rng_seed: 42,
            accounts_path: PathBuf::from("accounts.json"),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            spawn: SpawnSearch::default(),
            spores: SporeConfig::default(),
            gameplay: GameplayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.outbound_capacity == 0 || self.inbox_capacity == 0 {
            return Err("connection queue capacities must be > 0".to_string());
        }
        if self.hub_channel_capacity == 0 {
            return Err("hub_channel_capacity must be > 0".to_string());
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err("bcrypt_cost must be between 4 and 31".to_string());
        }
        if !self.spawn.initial_bound.is_finite() || self.spawn.initial_bound <= 0.0 {
            return Err("spawn.initial_bound must be finite and > 0".to_string());
        }
        if self.spawn.max_tries == 0 {
            return Err("spawn.max_tries must be > 0".to_string());
        }
        if self.spores.radius_min <= 0.0 || self.spores.radius_spread < 0.0 {
            return Err("spore radius_min must be > 0 and radius_spread >= 0".to_string());
        }
        if self.spores.stream_batch_size == 0 {
            return Err("spores.stream_batch_size must be > 0".to_string());
        }
        if self.spores.replenish_interval.is_zero() {
            return Err("spores.replenish_interval must be > 0".to_string());
        }
        self.gameplay.validate()
    }
}
