//! Scanning devices
//!
//! A [`Device`] turns radio advertisements into a stream of parsed
//! [`Peripheral`] values. The BLE implementation sits on top of btleplug and
//! forwards only advertisements carrying a supported beacon frame.

use crate::discovery::peripheral::{self, Peripheral};
use crate::error::{Error, Result};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

const SOURCE_BUFFER: usize = 1000;

/// Output of one scan: parsed peripherals plus a terminal error channel.
pub struct DeviceStream {
    data: mpsc::Receiver<Peripheral>,
    error: mpsc::Receiver<Error>,
}

impl DeviceStream {
    pub fn new(data: mpsc::Receiver<Peripheral>, error: mpsc::Receiver<Error>) -> Self {
        Self { data, error }
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Peripheral>, mpsc::Receiver<Error>) {
        (self.data, self.error)
    }
}

/// A source of peripheral observations
#[async_trait]
pub trait Device: Send + Sync {
    fn is_scanning(&self) -> bool;

    /// Start scanning. One scan at a time; the stream ends when `shutdown`
    /// flips to true or the radio fails.
    async fn scan(&self, shutdown: watch::Receiver<bool>) -> Result<DeviceStream>;
}

/// btleplug-backed BLE scanning device
pub struct BleDevice {
    adapter: Adapter,
    is_scanning: Arc<AtomicBool>,
}

impl BleDevice {
    /// Open the first available Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bluetooth("no bluetooth adapter available".to_string()))?;

        Ok(Self {
            adapter,
            is_scanning: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Device for BleDevice {
    fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    async fn scan(&self, mut shutdown: watch::Receiver<bool>) -> Result<DeviceStream> {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyScanning);
        }

        if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
            self.is_scanning.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                self.is_scanning.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let (data_tx, data_rx) = mpsc::channel(SOURCE_BUFFER);
        let (error_tx, error_rx) = mpsc::channel(1);

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = async { while !*shutdown.borrow() { if shutdown.changed().await.is_err() { break; } } } => break,
                    event = events.next() => match event {
                        Some(CentralEvent::ManufacturerDataAdvertisement { id, manufacturer_data }) => {
                            forward_advertisement(&adapter, &id, &manufacturer_data, &data_tx).await;
                        }
                        Some(_) => {}
                        None => {
                            let _ = error_tx
                                .send(Error::Source("advertisement stream closed".to_string()))
                                .await;
                            break;
                        }
                    },
                }
            }

            if let Err(e) = adapter.stop_scan().await {
                warn!(error = %e, "failed to stop scanning");
            }

            is_scanning.store(false, Ordering::SeqCst);
        });

        Ok(DeviceStream::new(data_rx, error_rx))
    }
}

async fn forward_advertisement(
    adapter: &Adapter,
    id: &PeripheralId,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    data_tx: &mpsc::Sender<Peripheral>,
) {
    // btleplug splits the company identifier out of the payload; the frame
    // checks below expect the raw on-air layout, so stitch it back together.
    for (company_id, payload) in manufacturer_data {
        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.extend_from_slice(&company_id.to_le_bytes());
        frame.extend_from_slice(payload);

        if !peripheral::is_supported_frame(&frame) {
            continue;
        }

        let properties = match adapter.peripheral(id).await {
            Ok(p) => match p.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "failed to read peripheral properties");
                    continue;
                }
            },
            Err(e) => {
                debug!(error = %e, "advertisement from unknown peripheral");
                continue;
            }
        };

        let parsed = Peripheral::from_advertisement(
            properties.local_name.unwrap_or_default(),
            &frame,
            properties.tx_power_level.unwrap_or_default() as f64,
            properties.rssi.unwrap_or_default() as f64,
            properties.address.to_string(),
        );

        match parsed {
            // Blocks when the tracker falls behind; backpressure is intended.
            Ok(peripheral) => {
                if data_tx.send(peripheral).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "failed to parse peripheral"),
        }
    }
}
