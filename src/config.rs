use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::env;

/// Startup configuration, assembled from the environment and optionally overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_host: String,
    pub mongo_port: u16,
    pub elasticsearch_host: String,
    pub elasticsearch_port: u16,
    pub elasticsearch_timeout_sec: u64,
    pub batch_size: i64,
    pub nb_indexation_workers: usize,
    pub update_we_freq: u32,
    pub extraction_methods: Vec<String>,
    pub default_extraction_method: String,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Ok(Self {
            mongo_host: env::var("MONGO_HOST").context("MONGO_HOST must be set")?,
            mongo_port: env::var("MONGO_PORT")
                .context("MONGO_PORT must be set")?
                .parse()
                .context("MONGO_PORT must be a valid port number")?,
            elasticsearch_host: env::var("ELASTICSEARCH_HOST").context("ELASTICSEARCH_HOST must be set")?,
            elasticsearch_port: env::var("ELASTICSEARCH_PORT")
                .context("ELASTICSEARCH_PORT must be set")?
                .parse()
                .context("ELASTICSEARCH_PORT must be a valid port number")?,
            elasticsearch_timeout_sec: env::var("ELASTICSEARCH_TIMEOUT_SEC")
                .context("ELASTICSEARCH_TIMEOUT_SEC must be set")?
                .parse()
                .context("ELASTICSEARCH_TIMEOUT_SEC must be a valid number of seconds")?,
            batch_size: env::var("BATCH_SIZE")
                .context("BATCH_SIZE must be set")?
                .parse()
                .context("BATCH_SIZE must be a valid integer")?,
            nb_indexation_workers: env::var("NB_INDEXATION_WORKERS")
                .context("NB_INDEXATION_WORKERS must be set")?
                .parse()
                .context("NB_INDEXATION_WORKERS must be a valid integer")?,
            update_we_freq: env::var("UPDATE_WE_FREQ")
                .context("UPDATE_WE_FREQ must be set")?
                .parse()
                .context("UPDATE_WE_FREQ must be a valid integer")?,
            extraction_methods: env::var("EXTRACTION_METHODS")
                .context("EXTRACTION_METHODS must be set")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            default_extraction_method: env::var("DEFAULT_EXTRACTION_METHOD")
                .context("DEFAULT_EXTRACTION_METHOD must be set")?,
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "./log".to_string()),
        })
    }

    /// Priority to CLI args over configuration, mirroring the source's flag handling.
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(batch_size) = cli.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(nb_indexation_workers) = cli.nb_indexation_workers {
            self.nb_indexation_workers = nb_indexation_workers;
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "hyphe-text-indexer")]
#[command(about = "Extracts readable text from crawled pages and indexes it in the search cluster")]
#[command(version)]
pub struct Cli {
    #[arg(long)]
    pub batch_size: Option<i64>,

    #[arg(long)]
    pub nb_indexation_workers: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_priority_over_config() {
        let mut config = Config {
            mongo_host: "localhost".to_string(),
            mongo_port: 27017,
            elasticsearch_host: "localhost".to_string(),
            elasticsearch_port: 9200,
            elasticsearch_timeout_sec: 30,
            batch_size: 100,
            nb_indexation_workers: 4,
            update_we_freq: 10,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: "textify".to_string(),
            log_dir: "./log".to_string(),
        };

        config.apply_cli_overrides(&Cli {
            batch_size: Some(250),
            nb_indexation_workers: None,
        });

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.nb_indexation_workers, 4);
    }
}
