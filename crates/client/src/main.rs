//! jobwatch - follow job lifecycle events from the command line.
//!
//! Usage: `jobwatch [JOB_ID...]`
//!
//! Connection settings come from the environment (see [`ClientConfig::from_env`]).
//! Any job ids given are subscribed to every time the connection opens.

use anyhow::Context;
use jobwatch_client::{
    logging, shared::JobUpdateMessage, ClientConfig, JobUpdateCallbacks, JobUpdates,
};

fn log_event(message: &JobUpdateMessage) {
    tracing::info!(
        event = %message.event_type,
        job = message.job_id().as_deref().unwrap_or("?"),
        status = message.job_status().unwrap_or("?"),
        timestamp = %message.timestamp,
        "Job event"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = ClientConfig::from_env();
    let job_ids: Vec<String> = std::env::args().skip(1).collect();
    tracing::info!(url = %config.ws_url, "Watching job events");

    let callbacks = JobUpdateCallbacks::new()
        .on_job_created(|_, message| log_event(message))
        .on_job_update(|_, message| log_event(message))
        .on_job_completed(|_, message| log_event(message))
        .on_job_failed(|_, message| log_event(message))
        .on_error(|error| tracing::warn!("{}", error));

    let updates = JobUpdates::new(config.into(), callbacks);
    let mut states = updates.state_changes();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(%state, "Connection state changed");
                if state.is_connected() {
                    for job_id in &job_ids {
                        updates.subscribe_to_job(job_id);
                    }
                }
            }
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    updates.disconnect();
    Ok(())
}
