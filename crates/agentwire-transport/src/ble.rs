//! Bluetooth LE radio link (GATT central) built on `btleplug`.
//!
//! The device advertises [`SERVICE_UUID`], notifies requests on [`TX_UUID`]
//! and accepts reply chunks written to [`RX_UUID`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::radio::{RadioLink, DEFAULT_RADIO_MTU};

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fc01_0000_1000_8000_00805f9b34fb);
pub const TX_UUID: Uuid = Uuid::from_u128(0x0000fc02_0000_1000_8000_00805f9b34fb);
pub const RX_UUID: Uuid = Uuid::from_u128(0x0000fc03_0000_1000_8000_00805f9b34fb);

const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const SCAN_POLL: Duration = Duration::from_millis(500);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BleLink {
    peripheral: Peripheral,
    rx: Characteristic,
    notifications: Mutex<NotificationStream>,
    name: String,
}

fn radio_err(context: &str, err: btleplug::Error) -> TransportError {
    TransportError::Radio(format!("{context}: {err}"))
}

impl BleLink {
    /// Scan for a device advertising [`SERVICE_UUID`] and connect to it.
    pub async fn discover() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| radio_err("bluetooth manager", e))?;
        let central = manager
            .adapters()
            .await
            .map_err(|e| radio_err("list adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Radio("no bluetooth adapter found".to_string()))?;

        central
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await
            .map_err(|e| radio_err("start scan", e))?;
        info!(service = %SERVICE_UUID, "scanning for device");

        let found = tokio::time::timeout(SCAN_TIMEOUT, async {
            loop {
                let peripherals = central
                    .peripherals()
                    .await
                    .map_err(|e| radio_err("list peripherals", e))?;
                for peripheral in peripherals {
                    let props = peripheral
                        .properties()
                        .await
                        .map_err(|e| radio_err("read properties", e))?;
                    if let Some(props) = props {
                        if props.services.contains(&SERVICE_UUID) {
                            let name = props
                                .local_name
                                .unwrap_or_else(|| props.address.to_string());
                            return Ok::<_, TransportError>((peripheral, name));
                        }
                    }
                }
                tokio::time::sleep(SCAN_POLL).await;
            }
        })
        .await;
        let _ = central.stop_scan().await;

        let (peripheral, name) = match found {
            Ok(found) => found?,
            Err(_) => {
                return Err(TransportError::Radio(format!(
                    "no device advertising {SERVICE_UUID} within {}s",
                    SCAN_TIMEOUT.as_secs()
                )))
            }
        };
        info!(device = %name, "found radio device");

        Self::connect(peripheral, name).await
    }

    async fn connect(peripheral: Peripheral, name: String) -> Result<Self> {
        peripheral
            .connect()
            .await
            .map_err(|e| radio_err("connect", e))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| radio_err("discover services", e))?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| TransportError::Radio(format!("characteristic {uuid} missing")))
        };
        let tx = find(TX_UUID)?;
        let rx = find(RX_UUID)?;

        peripheral
            .subscribe(&tx)
            .await
            .map_err(|e| radio_err("subscribe", e))?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| radio_err("notification stream", e))?;
        info!(device = %name, "radio link connected");

        Ok(Self {
            peripheral,
            rx,
            notifications: Mutex::new(notifications),
            name,
        })
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| radio_err("disconnect", e))
    }
}

#[async_trait]
impl RadioLink for BleLink {
    fn mtu(&self) -> usize {
        DEFAULT_RADIO_MTU
    }

    async fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > self.mtu() {
            return Err(TransportError::MtuExceeded {
                len: chunk.len(),
                mtu: self.mtu(),
            });
        }
        self.peripheral
            .write(&self.rx, chunk, WriteType::WithoutResponse)
            .await
            .map_err(|e| radio_err("write chunk", e))
    }

    async fn next_notification_batch(&self) -> Result<Option<Vec<Vec<u8>>>> {
        let mut stream = self.notifications.lock().await;
        let first = loop {
            match stream.next().await {
                Some(n) if n.uuid == TX_UUID => break n.value,
                Some(n) => debug!(uuid = %n.uuid, "ignoring notification"),
                None => return Ok(None),
            }
        };

        // Everything already queued behind the first notification joins its batch.
        let mut batch = vec![first];
        while let Some(Some(n)) = stream.next().now_or_never() {
            if n.uuid == TX_UUID {
                batch.push(n.value);
            }
        }
        Ok(Some(batch))
    }

    fn peer_name(&self) -> String {
        self.name.clone()
    }
}
