use std::time::Duration;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use rdkafka::config::ClientConfig;

use crate::kafka::consumer_client_config;
use crate::strategy::StrategyConfig;
use crate::worker_pool::WorkerPoolConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "events")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "ordered-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    /// Number of worker queues; also the upper bound on processing parallelism
    #[envconfig(default = "4")]
    pub num_workers: usize,

    /// Capacity of each worker queue
    #[envconfig(default = "1000")]
    pub channel_buffer_size: usize,

    #[envconfig(default = "1")]
    pub commit_interval_secs: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    /// JSON field used to derive a record's group key
    #[envconfig(default = "distinct_id")]
    pub group_key_field: String,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self> {
        let config = Self::init_from_env().context("Failed to load config from env")?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        consumer_client_config(
            &self.kafka_hosts,
            &self.kafka_consumer_group,
            &self.kafka_consumer_offset_reset,
        )
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            pool: WorkerPoolConfig {
                num_workers: self.num_workers,
                channel_buffer_size: self.channel_buffer_size,
                shutdown_grace: self.shutdown_timeout(),
            },
            commit_interval: self.commit_interval(),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka_consumer_group, "ordered-consumer");
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.channel_buffer_size, 1000);
        assert_eq!(config.commit_interval(), Duration::from_secs(1));
        assert_eq!(config.group_key_field, "distinct_id");
        assert_eq!(config.bind_address(), "0.0.0.0:3301");
    }

    #[test]
    fn test_strategy_config_carries_pool_sizing() {
        let mut env = HashMap::new();
        env.insert("NUM_WORKERS".to_string(), "8".to_string());
        env.insert("CHANNEL_BUFFER_SIZE".to_string(), "50".to_string());
        let config = Config::init_from_hashmap(&env).unwrap();

        let strategy = config.strategy_config();
        assert_eq!(strategy.pool.num_workers, 8);
        assert_eq!(strategy.pool.channel_buffer_size, 50);
    }
}
