use std::{future::IntoFuture, process, time::Duration};

use pagecache::{
    cache::{CacheState, CacheStore},
    config::{self, Settings},
    infra::{
        error::InfraError,
        http::{self, OriginProxy},
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::List(_) => run_list(settings).await,
        config::Command::Flush(_) => run_flush(settings).await,
    }
}

async fn open_store(settings: &Settings) -> Result<CacheStore, InfraError> {
    let directory = settings.cache.directory.clone();
    let ttl = settings.cache.ttl;
    let store = tokio::task::spawn_blocking(move || CacheStore::open(directory, ttl))
        .await??;
    Ok(store)
}

async fn run_serve(settings: Settings) -> Result<(), InfraError> {
    let origin_url = settings.origin.url.clone().ok_or_else(|| {
        InfraError::configuration("`origin.url` is required to serve (set PAGECACHE__ORIGIN__URL)")
    })?;
    if settings.cache.purge.key.is_none() {
        warn!("no purge key configured, purge endpoint disabled");
    }

    let store = open_store(&settings).await?;
    let origin = OriginProxy::new(origin_url, settings.origin.timeout)?;
    let state = CacheState::new(settings.cache.clone(), store);
    let router = http::build_router(state, origin.clone());

    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(
        addr = %settings.server.addr,
        origin = %origin.base(),
        "pagecache listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => result?,
        () = drain_deadline(shutdown_rx, grace) => {
            warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out");
        }
    }

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender means the signal task is gone; keep serving.
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn drain_deadline(shutdown: watch::Receiver<bool>, grace: Duration) {
    wait_for(shutdown).await;
    tokio::time::sleep(grace).await;
}

async fn run_list(settings: Settings) -> Result<(), InfraError> {
    let store = open_store(&settings).await?;
    let listing = store.list();
    let json = serde_json::to_string_pretty(&listing)?;
    println!("{json}");
    Ok(())
}

async fn run_flush(settings: Settings) -> Result<(), InfraError> {
    let store = open_store(&settings).await?;
    let entries = store.len();
    tokio::task::spawn_blocking(move || store.flush()).await??;
    info!(
        directory = %settings.cache.directory.display(),
        entries,
        "cache flushed"
    );
    Ok(())
}
