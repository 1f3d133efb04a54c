//! BLE advertisement ingestion
//!
//! A [`Device`](device::Device) scans for advertisements, filters them down to
//! supported beacon frames, and produces a [`DeviceStream`](device::DeviceStream)
//! of parsed [`Peripheral`](peripheral::Peripheral) values consumed by the
//! tracking pipeline.

pub mod device;
pub mod mock;
pub mod peripheral;

pub use device::{BleDevice, Device, DeviceStream};
pub use mock::MockDevice;
pub use peripheral::{Peripheral, PeripheralDetail, Proximity};
