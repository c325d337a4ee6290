//! Datawatch - dataset availability dashboard client
//!
//! Polls the monitoring back end for dataset status, merges live push
//! updates into the same snapshot, and keeps a bounded notification feed.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod events;
pub mod io;
pub mod model;
pub mod notifications;
pub mod push;
pub mod renderer;
pub mod scheduler;
pub mod transport;

pub use config::{load_config, Config};
pub use dashboard::Dashboard;
pub use error::{DatawatchError, Result};
pub use events::{ChangeBus, ChangeEvent};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::renderer::{spawn_renderer, LogRenderer, Renderer};

/// Run the live dashboard until `cancel` fires
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let bus = ChangeBus::default();
    let dashboard = Arc::new(Dashboard::from_config(config, bus.clone())?);

    let renderer: Arc<dyn Renderer> = Arc::new(LogRenderer);
    let renderer_handle = spawn_renderer(&bus, renderer, cancel.clone());

    let push_handle = if dashboard.config().push.enabled {
        let channel = Arc::new(dashboard.push_channel()?);
        let dashboard = Arc::clone(&dashboard);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = dashboard.run_push(channel, cancel).await {
                tracing::warn!("Live updates stopped: {}", e);
            }
        }))
    } else {
        tracing::info!("Live updates disabled");
        None
    };

    dashboard.start().await;
    tracing::info!("Datawatch started");

    cancel.cancelled().await;

    dashboard.stop();
    if let Some(handle) = push_handle {
        handle.await.ok();
    }
    renderer_handle.await.ok();
    tracing::info!("Datawatch stopped");

    Ok(())
}
