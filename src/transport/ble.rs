//! Desktop BLE backend built on btleplug.
//!
//! [`BleScanner`] and [`BleConnector`] share one adapter. Addresses handed
//! out by the scanner are the platform peripheral ids, so they are only
//! meaningful to a connector on the same adapter.

use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::nus::{NUS_RX_CHAR_UUID, NUS_TX_CHAR_UUID};
use super::{Connector, Transport, TransportEvent, INBOUND_CHANNEL_CAPACITY};
use crate::error::{LinkError, Result};
use crate::locator::{DiscoveredDevice, Scanner};

fn ble_error(e: btleplug::Error) -> LinkError {
    LinkError::Connection(e.to_string())
}

fn peripheral_address(id: &PeripheralId) -> String {
    format!("{:?}", id)
}

/// First Bluetooth adapter of the system.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(ble_error)?;
    manager
        .adapters()
        .await
        .map_err(ble_error)?
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::Connection("no BLE adapter found".to_string()))
}

/// Scanner over a btleplug adapter.
#[derive(Clone)]
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    /// Scan with `adapter`.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

impl Scanner for BleScanner {
    async fn start_scan(&self) -> Result<()> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(ble_error)? {
            let name = peripheral
                .properties()
                .await
                .map_err(ble_error)?
                .and_then(|props| props.local_name);
            devices.push(DiscoveredDevice {
                name,
                address: peripheral_address(&peripheral.id()),
            });
        }
        Ok(devices)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(ble_error)
    }
}

/// Connector opening NUS sessions on a btleplug adapter.
#[derive(Clone)]
pub struct BleConnector {
    adapter: Adapter,
}

impl BleConnector {
    /// Connect through `adapter`.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

impl Connector for BleConnector {
    type Transport = BleTransport;

    async fn connect(&self, address: &str) -> Result<BleTransport> {
        let peripheral = self
            .adapter
            .peripherals()
            .await
            .map_err(ble_error)?
            .into_iter()
            .find(|p| peripheral_address(&p.id()) == address)
            .ok_or_else(|| LinkError::Connection(format!("unknown peripheral {}", address)))?;

        peripheral.connect().await.map_err(ble_error)?;
        peripheral.discover_services().await.map_err(ble_error)?;

        let find = |uuid: u128| {
            let uuid = Uuid::from_u128(uuid);
            peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == uuid)
                .ok_or_else(|| LinkError::Connection(format!("missing characteristic {}", uuid)))
        };
        let rx_char = find(NUS_RX_CHAR_UUID)?;
        let tx_char = find(NUS_TX_CHAR_UUID)?;

        Ok(BleTransport {
            adapter: self.adapter.clone(),
            peripheral,
            rx_char,
            tx_char,
            forwarder: Arc::new(Mutex::new(None)),
        })
    }
}

/// NUS session on a connected peripheral.
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    rx_char: Characteristic,
    tx_char: Characteristic,
    forwarder: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BleTransport {
    fn stop_forwarder(&self) {
        let handle = self
            .forwarder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Transport for BleTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.rx_char, data, WriteType::WithoutResponse)
            .await
            .map_err(ble_error)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut notifications = self.peripheral.notifications().await.map_err(ble_error)?;
        let mut central = self.adapter.events().await.map_err(ble_error)?;
        self.peripheral
            .subscribe(&self.tx_char)
            .await
            .map_err(ble_error)?;

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let id = self.peripheral.id();
        let tx_uuid = self.tx_char.uuid;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            let _ = tx.send(TransportEvent::Disconnected).await;
                            break;
                        };
                        if notification.uuid != tx_uuid {
                            continue;
                        }
                        let event = TransportEvent::Notification(Bytes::from(notification.value));
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    event = central.next() => {
                        match event {
                            Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                                let _ = tx.send(TransportEvent::Disconnected).await;
                                break;
                            }
                            Some(_) => {}
                            None => {
                                let _ = tx.send(TransportEvent::Disconnected).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        self.stop_forwarder();
        *self.forwarder.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(rx)
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.stop_forwarder();
        self.peripheral
            .unsubscribe(&self.tx_char)
            .await
            .map_err(ble_error)
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_forwarder();
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}
