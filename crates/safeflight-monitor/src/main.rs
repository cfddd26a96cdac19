//! Safeflight monitor - runs the flight manager against a JSON-lines vehicle
//! bridge on stdin/stdout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};

use anyhow::Result;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safeflight_core::{FlightStateMachine, SeparationBands};
use safeflight_monitor::config::Config;
use safeflight_monitor::ingest::{run_egress, run_ingest};
use safeflight_monitor::link::ChannelLink;
use safeflight_monitor::loops::control_loop::{run_control_loop, LoopSettings};
use safeflight_monitor::state::SharedState;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries commands; logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("safeflight_monitor=debug".parse()?)
                .add_directive("safeflight_core=info".parse()?),
        )
        .init();

    tracing::info!("Starting safeflight monitor...");

    let config = Config::from_env()?;
    let state = Arc::new(SharedState::new());
    let running = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std_mpsc::channel();

    let ingest = tokio::spawn(run_ingest(
        BufReader::new(tokio::io::stdin()),
        state.clone(),
        ack_tx,
        shutdown_tx.subscribe(),
    ));
    let egress = tokio::spawn(run_egress(
        tokio::io::stdout(),
        command_rx,
        shutdown_tx.subscribe(),
    ));

    let link = ChannelLink::new(command_tx, ack_rx, config.ack_timeout);
    let daa = SeparationBands::from_params(&config.params);
    let fms = FlightStateMachine::new(config.params.clone(), link, daa);
    let settings = LoopSettings {
        period: config.cycle_period(),
        traffic_stale_after: config.traffic_stale_after,
        params: config.params.clone(),
    };

    let control = tokio::task::spawn_blocking({
        let state = state.clone();
        let running = running.clone();
        move || run_control_loop(state, fms, settings, running)
    });

    tokio::spawn({
        let running = running.clone();
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping");
                running.store(false, Ordering::SeqCst);
                let _ = shutdown_tx.send(());
            }
        }
    });

    // The loop checks `running` once per cycle, so it returns after an
    // interrupt as well.
    let final_phase = control.await?;
    tracing::info!("Control loop finished in phase {:?}", final_phase);

    running.store(false, Ordering::SeqCst);
    let _ = shutdown_tx.send(());
    ingest.abort();
    if let Err(e) = egress.await? {
        tracing::error!("Egress failed: {}", e);
    }

    Ok(())
}
