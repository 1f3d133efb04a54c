//! The presence state machine
//!
//! One cooperative loop selects over the cancellation signal, the heartbeat
//! tick, incoming advertisements, and source errors. The loop is the sole
//! owner of the track map; everything downstream consumes edge events.

use crate::config::TrackingConfig;
use crate::discovery::{Device, DeviceStream, Peripheral};
use crate::error::{Error, Result};
use crate::tracking::stream::TrackerStream;
use crate::tracking::track::Track;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{error, info};

/// Turns a raw advertisement stream into `found`/`lost` edge events.
///
/// A tracker is one-shot: [`Tracker::track`] may be called once. The output
/// channels are bounded; a slow consumer blocks the loop rather than dropping
/// observations.
pub struct Tracker {
    device: Arc<dyn Device>,
    settings: TrackingConfig,
    channel_buffer: usize,
    started: AtomicBool,
    is_running: Arc<AtomicBool>,
}

impl Tracker {
    pub fn new(device: Arc<dyn Device>, settings: TrackingConfig, channel_buffer: usize) -> Self {
        Self {
            device,
            settings,
            channel_buffer,
            started: AtomicBool::new(false),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start tracking. Fails when called twice or when the device is already
    /// scanning for another consumer.
    pub async fn track(&self, shutdown: watch::Receiver<bool>) -> Result<TrackerStream> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyTracking);
        }

        if self.device.is_scanning() {
            self.started.store(false, Ordering::SeqCst);
            return Err(Error::AlreadyScanning);
        }

        let source = match self.device.scan(shutdown.clone()).await {
            Ok(source) => source,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (found_tx, found_rx) = mpsc::channel(self.channel_buffer);
        let (lost_tx, lost_rx) = mpsc::channel(self.channel_buffer);
        let (error_tx, error_rx) = mpsc::channel(1);

        self.is_running.store(true, Ordering::SeqCst);

        tokio::spawn(run_loop(
            self.settings.clone(),
            shutdown,
            source,
            found_tx,
            lost_tx,
            error_tx,
            self.is_running.clone(),
        ));

        Ok(TrackerStream::new(found_rx, lost_rx, error_rx))
    }
}

async fn run_loop(
    settings: TrackingConfig,
    mut shutdown: watch::Receiver<bool>,
    source: DeviceStream,
    found_tx: mpsc::Sender<Peripheral>,
    lost_tx: mpsc::Sender<Peripheral>,
    error_tx: mpsc::Sender<Error>,
    is_running: Arc<AtomicBool>,
) {
    info!("started tracking");

    let (mut data_rx, mut source_error_rx) = source.into_parts();
    let mut tracks: HashMap<String, Track> = HashMap::new();
    let mut ticker = time::interval_at(
        Instant::now() + settings.heartbeat,
        settings.heartbeat,
    );

    loop {
        tokio::select! {
            // Cancellation wins any race with a tick or an advertisement.
            biased;
            _ = async { while !*shutdown.borrow() { if shutdown.changed().await.is_err() { break; } } } => break,
            _ = ticker.tick() => {
                if !heartbeat(&mut tracks, &lost_tx).await {
                    break;
                }
            }
            maybe = data_rx.recv() => match maybe {
                Some(peripheral) => {
                    if !push(&mut tracks, peripheral, settings.ttl, &found_tx).await {
                        break;
                    }
                }
                None => break,
            },
            maybe = source_error_rx.recv() => {
                if let Some(err) = maybe {
                    error!(error = %err, "error occurred in device stream");
                    let _ = error_tx.send(err).await;
                }
                break;
            }
        }
    }

    is_running.store(false, Ordering::SeqCst);
    info!("stopped tracking");

    // Close order is part of the contract: found, then lost, then error.
    drop(found_tx);
    drop(lost_tx);
    drop(error_tx);
}

/// Evict every track whose TTL has elapsed, publishing it on `lost`.
///
/// Returns false when the lost channel is closed.
async fn heartbeat(tracks: &mut HashMap<String, Track>, lost_tx: &mpsc::Sender<Peripheral>) -> bool {
    if tracks.is_empty() {
        return true;
    }

    let mut active = HashMap::with_capacity(tracks.len());

    for (key, track) in tracks.drain() {
        if track.is_active() {
            active.insert(key, track);
        } else {
            info!(key = %key, "lost a peripheral");

            if lost_tx.send(track.into_peripheral()).await.is_err() {
                return false;
            }
        }
    }

    *tracks = active;
    true
}

/// Record a sighting: refresh a known track or insert a new one and publish
/// it on `found`.
///
/// Returns false when the found channel is closed.
async fn push(
    tracks: &mut HashMap<String, Track>,
    peripheral: Peripheral,
    ttl: Duration,
    found_tx: &mpsc::Sender<Peripheral>,
) -> bool {
    let key = peripheral.unique_key().to_string();

    match tracks.get_mut(&key) {
        Some(track) => track.refresh(),
        None => {
            info!(key = %key, "found a peripheral");
            tracks.insert(key, Track::new(peripheral.clone(), ttl));

            if found_tx.send(peripheral).await.is_err() {
                return false;
            }
        }
    }

    true
}
