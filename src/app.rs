//! Application wiring and lifecycle
//!
//! Builds the pipeline (device → tracker → broker → sender), attaches the
//! activity monitor, starts the management API, and owns the shared
//! cancellation signal. Shutdown is edge-triggered and idempotent: SIGINT,
//! a terminal source error, or an API failure all flip the same switch.

use crate::config::Config;
use crate::delivery::{HttpTransport, Sender};
use crate::discovery::BleDevice;
use crate::error::Result;
use crate::monitoring::ActivityMonitor;
use crate::notification::Broker;
use crate::server::{self, AppState};
use crate::storage::Storage;
use crate::tracking::Tracker;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Application {
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the agent until interrupted.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let storage = Arc::new(Storage::open(&self.config.database.path).await?);
        let activity = Arc::new(ActivityMonitor::new());

        let transport = Arc::new(HttpTransport::new(self.config.transport.clone())?);
        let sender = Arc::new(Sender::new(transport));
        let broker = Broker::new(sender.clone(), storage.clone());

        let _activity_task = activity.watch(broker.subscribe());

        let device = Arc::new(BleDevice::new().await?);
        let tracker = Tracker::new(
            device,
            self.config.tracking.clone(),
            self.config.sender.channel_buffer,
        );

        let stream = tracker.track(shutdown_rx.clone()).await?;
        let mut pipeline = broker.consume(stream);

        let state = AppState {
            storage,
            activity,
        };

        let mut api = tokio::spawn(server::serve(
            self.config.http.listen_address,
            state,
            shutdown_rx,
        ));

        let mut pipeline_done = false;
        let mut api_done = false;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt");
            }
            _ = &mut pipeline => {
                // The tracker closed its streams without being cancelled,
                // which only happens on a terminal source error.
                warn!("pipeline stopped");
                pipeline_done = true;
            }
            result = &mut api => {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "management api failed");
                }
                api_done = true;
            }
        }

        let _ = shutdown_tx.send(true);

        if !pipeline_done {
            let _ = pipeline.await;
        }

        if !api_done {
            match api.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "management api failed"),
                Err(e) => error!(error = %e, "management api panicked"),
            }
        }

        info!("shutdown complete");

        Ok(())
    }
}
