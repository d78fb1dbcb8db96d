//! Headless driver for the job-center site core: wires the REST client, both
//! push listeners and the state store together and renders changes as logs.

mod controller;
pub mod view;

pub use controller::{LiveController, LEAD_NOTIFICATION_TITLE};

use jc_api::{ApiClient, ApiError};
use jc_channel::{ChannelError, LeadListener, StatsListener};
use jc_core::config::LiveConfig;
use jc_store::{AppStore, StoreError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub async fn run(config: LiveConfig, shutdown: watch::Receiver<bool>) -> Result<(), LiveError> {
    let store = AppStore::new(config.store)?;
    run_with_store(config, store, shutdown).await
}

/// Runs one session against `store` until `shutdown` flips to true (or its sender
/// goes away), then closes both channels and cancels the store's timers.
pub async fn run_with_store(
    config: LiveConfig,
    store: AppStore,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LiveError> {
    let controller = LiveController::new(store.clone());
    let api = ApiClient::new(&config.api)?;

    let lead_controller = controller.clone();
    let leads = LeadListener::start(&config.channel, move |lead| {
        lead_controller.on_new_lead(&lead);
    })?;
    let stats = StatsListener::start(&config.channel)?;
    let mut stats_updates = stats.updates();
    let mut stats_open = true;

    let mut states = store.watch();
    let mut rendered = states.borrow_and_update().clone();

    info!(
        event = "live_start",
        api = %config.api.base_url,
        stats_endpoint = %stats.client().endpoint(),
        leads_endpoint = %leads.client().endpoint()
    );

    let startup = store.fetch_stats(&api);
    tokio::pin!(startup);
    let mut fetched = false;
    let splash = tokio::time::sleep(config.splash);
    tokio::pin!(splash);
    let mut splash_done = false;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = &mut startup, if !fetched => {
                fetched = true;
            }
            () = &mut splash, if !splash_done => {
                splash_done = true;
                controller.finish_splash();
            }
            changed = stats_updates.changed(), if stats_open => {
                if changed.is_err() {
                    stats_open = false;
                    continue;
                }
                let latest = *stats_updates.borrow_and_update();
                if let Some(snapshot) = latest {
                    controller.apply_stats(snapshot);
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = states.borrow_and_update().clone();
                view::render(&rendered, &current);
                rendered = current;
            }
        }
    }

    leads.close();
    stats.close();
    store.shutdown();
    info!(event = "live_stopped");
    Ok(())
}
