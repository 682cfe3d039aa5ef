//! Process entrypoint (C10): loads configuration, wires up the document-store and
//! search-cluster clients, spawns the worker pool and the coordinator, and owns the
//! `SIGINT`/`SIGTERM` shutdown sequence of §5.

use anyhow::{Context, Result};
use clap::Parser;
use hyphe_text_indexer::config::{Cli, Config};
use hyphe_text_indexer::coordinator::{drain_pending_tasks, load_mapping_template, revert_in_flight_pages, Coordinator};
use hyphe_text_indexer::logging;
use hyphe_text_indexer::store::{DocumentStore, ElasticsearchIndex, MongoDocumentStore, SearchIndex};
use hyphe_text_indexer::worker::{self, IndexationTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const MAPPING_TEMPLATE_JSON: &str = include_str!("../../index_mappings.json");
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3000);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    config.apply_cli_overrides(&cli);

    let _logging_guard = logging::init(&config.log_dir).context("failed to initialize logging")?;
    tracing::info!(
        batch_size = config.batch_size,
        nb_indexation_workers = config.nb_indexation_workers,
        "hyphe-text-indexer starting"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(
        MongoDocumentStore::connect(&config.mongo_host, config.mongo_port)
            .await
            .context("document store unreachable")?,
    );
    let search: Arc<dyn SearchIndex> = Arc::new(
        ElasticsearchIndex::connect(
            &config.elasticsearch_host,
            config.elasticsearch_port,
            config.elasticsearch_timeout_sec,
        )
        .await
        .context("search cluster never reached a healthy state")?,
    );

    let mapping_template = load_mapping_template(MAPPING_TEMPLATE_JSON)?;

    let (tx, rx) = mpsc::channel::<IndexationTask>(config.nb_indexation_workers);
    let rx = Arc::new(Mutex::new(rx));

    let mut worker_handles = Vec::with_capacity(config.nb_indexation_workers);
    for id in 0..config.nb_indexation_workers {
        let rx = rx.clone();
        let store = store.clone();
        let search = search.clone();
        worker_handles.push(tokio::spawn(worker::run_worker(id, rx, store, search)));
    }

    let coordinator = Coordinator::new(
        store.clone(),
        search.clone(),
        tx,
        config.batch_size,
        config.update_we_freq,
        mapping_template,
    );

    let cancel = CancellationToken::new();
    let coordinator_handle = tokio::spawn(coordinator.run(cancel.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight batches");
    cancel.cancel();

    // §5 step 1: the coordinator stops scheduling once `run` returns, but any batch it already
    // enqueued ahead of a free worker is still sitting in the channel — discard it here rather
    // than letting a worker pick it up and dispatch fresh work after shutdown has begun.
    coordinator_handle.await.context("coordinator task panicked")?;
    drain_pending_tasks(&rx).await;

    // §5 steps 2-3: dropping `tx` above closed the channel, so each worker exits after finishing
    // whatever batch it already holds. Join them all before touching the store again.
    for (id, handle) in worker_handles.into_iter().enumerate() {
        match tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!(worker = id, %error, "worker task panicked"),
            Err(_) => tracing::error!(worker = id, "worker did not stop within the shutdown timeout"),
        }
    }

    // §5 step 4: only now, with every worker stopped, is it safe to revert non-terminal
    // `IN_BATCH_*` pages without racing a worker's own `mark_page_indexed`/`mark_page_error`.
    revert_in_flight_pages(store.as_ref()).await;

    tracing::info!("hyphe-text-indexer stopped");
    Ok(())
}

/// Resolves once either `SIGINT` or `SIGTERM` is received; the two are handled identically,
/// per §5 — only the coordinator reacts, workers never install a handler of their own.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
