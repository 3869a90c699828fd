//! ==============================================================================
//! main.rs - sensor bridge entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the discovery feed, the node tree synchronizer and the served
//!     address space together and keeps them running until ctrl-c.
//!
//! responsibilities:
//!     - load configuration (config.rs) and install logging
//!     - build the opc ua server and register the namespace (endpoint.rs)
//!     - resolve-or-create the root container (sync.rs)
//!     - serve the address space over opc.tcp and http (web.rs)
//!     - run the reconciliation loop over the configured feed (bridge.rs)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    bridge host (this file)                   │
//!     │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//!     │  │ feed        │  │ reconcile    │  │ web server         │  │
//!     │  │ (sim/stdin) │─>│ loop         │  │ (history/stats)    │  │
//!     │  └─────────────┘  └──────┬───────┘  └─────────┬──────────┘  │
//!     │                          │ writes             │ reads       │
//!     │                    ┌─────┴────────────────────┴─┐           │
//!     │                    │       address space        │           │
//!     │                    └─────────────┬──────────────┘           │
//!     │                                  │ node store               │
//!     │                    ┌─────────────┴──────────────┐           │
//!     │                    │  opc ua server (opc.tcp)   │           │
//!     │                    └────────────────────────────┘           │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensor_ua_bridge::address_space::{AddressSpace, OBJECTS_FOLDER};
use sensor_ua_bridge::bridge::{Bridge, LoopExit};
use sensor_ua_bridge::config::{FeedKind, HostConfig};
use sensor_ua_bridge::endpoint;
use sensor_ua_bridge::feed::{DiscoveryFeed, JsonLinesFeed, SimulatedFeed};
use sensor_ua_bridge::sync::Synchronizer;
use sensor_ua_bridge::web::{self, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    // logging is not installed yet, so config warnings go through a
    // temporary default subscriber
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_target(false).finish(),
        HostConfig::load_or_default,
    )?;
    init_logging(&config.logging.level);

    info!("===========================================================");
    info!("  Sensor Bridge - live sensor subtrees in an address space");
    info!("===========================================================");
    config.log_summary();

    // step 2: opc ua server + address space
    let server = endpoint::build(&config.server).context("failed to build opc ua server")?;
    let space = AddressSpace::new(
        server.address_space(),
        config.server.server_name.clone(),
        config.server.endpoint.clone(),
        config.server.namespace_uri.clone(),
        config.history_settings(),
    )
    .context("failed to prepare address space")?;
    info!(
        namespace = %config.server.namespace_uri,
        index = space.namespace_index(),
        "namespace registered"
    );

    // step 3: root container + synchronizer
    let synchronizer = Synchronizer::start(
        Arc::new(space.clone()),
        OBJECTS_FOLDER,
        &config.server.root_name,
        config.naming_rule(),
    )
    .await
    .context("failed to create root container")?;

    // step 4: served endpoints in background
    tokio::spawn(endpoint::serve(server, config.server.endpoint.clone()));

    let web_state = WebState {
        space: space.clone(),
        stats: synchronizer.stats(),
        root: synchronizer.root(),
    };
    let bind = config.server.http_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = web::run_server(&bind, web_state).await {
            error!(error = %format!("{e:#}"), "web server error");
        }
    });

    // step 5: reconciliation loop
    let feed: Box<dyn DiscoveryFeed> = match config.feed.kind {
        FeedKind::Simulated => Box::new(SimulatedFeed::new(
            config.simulated_identities(),
            Duration::from_millis(config.feed.interval_ms),
        )),
        FeedKind::Stdin => Box::new(JsonLinesFeed::stdin()),
    };
    let mut bridge = Bridge::new(
        synchronizer,
        config.identity_filter(),
        config.bridge_settings(),
    );
    info!("starting reconciliation loop");

    let exit = bridge.run(feed, shutdown_signal()).await?;
    if exit == LoopExit::FeedEnded {
        // keep serving the last values until asked to stop
        info!("feed finished, serving last known values until ctrl-c");
        shutdown_signal().await;
    }

    info!("shutting down");
    Ok(())
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
