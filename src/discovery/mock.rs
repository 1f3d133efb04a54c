//! Scripted scanning device for tests and dry runs

use crate::discovery::device::{Device, DeviceStream};
use crate::discovery::peripheral::Peripheral;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const MOCK_BUFFER: usize = 1000;

/// A [`Device`] whose sightings are injected by the caller.
///
/// `emit` feeds a peripheral into the stream as if it had been advertised;
/// `fail` injects a terminal source error; `close` ends the stream the way a
/// radio teardown would.
pub struct MockDevice {
    is_scanning: Arc<AtomicBool>,
    data_tx: Mutex<Option<mpsc::Sender<Peripheral>>>,
    error_tx: Mutex<Option<mpsc::Sender<Error>>>,
    stream: Mutex<Option<DeviceStream>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let (data_tx, data_rx) = mpsc::channel(MOCK_BUFFER);
        let (error_tx, error_rx) = mpsc::channel(1);

        Self {
            is_scanning: Arc::new(AtomicBool::new(false)),
            data_tx: Mutex::new(Some(data_tx)),
            error_tx: Mutex::new(Some(error_tx)),
            stream: Mutex::new(Some(DeviceStream::new(data_rx, error_rx))),
        }
    }

    /// Inject a sighting.
    pub fn emit(&self, peripheral: Peripheral) -> Result<()> {
        let guard = self.data_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Source("mock stream closed".to_string()))?;

        tx.try_send(peripheral)
            .map_err(|e| Error::Source(e.to_string()))
    }

    /// Inject a terminal source error.
    pub fn fail(&self, error: Error) -> Result<()> {
        let guard = self.error_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Source("mock stream closed".to_string()))?;

        tx.try_send(error).map_err(|e| Error::Source(e.to_string()))
    }

    /// Close both stream channels.
    pub fn close(&self) {
        self.data_tx.lock().take();
        self.error_tx.lock().take();
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Device for MockDevice {
    fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    async fn scan(&self, mut shutdown: watch::Receiver<bool>) -> Result<DeviceStream> {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyScanning);
        }

        let stream = self
            .stream
            .lock()
            .take()
            .ok_or(Error::AlreadyScanning)?;

        let is_scanning = self.is_scanning.clone();

        tokio::spawn(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            is_scanning.store(false, Ordering::SeqCst);
        });

        Ok(stream)
    }
}
