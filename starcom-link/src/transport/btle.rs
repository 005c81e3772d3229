//! [`Transport`] backed by btleplug
//!
//! Each request is accepted synchronously and carried out on a spawned tokio
//! task, which reports back on the transport event channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use starcom_proto::CccdValue;
use starcom_proto::ble::{CCCD_UUID, name_of};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    CharProperties, CharacteristicAddr, GattCharacteristic, GattService, LinkId, Transport,
    TransportError, TransportEvent, TransportEventKind,
};
use crate::LinkConfig;

type Events = mpsc::UnboundedSender<TransportEvent>;

struct Slot {
    address: BDAddr,
    peripheral: Option<Peripheral>,
    /// Connect + notification pump for this handle
    task: Option<JoinHandle<()>>,
}

type Slots = Arc<Mutex<HashMap<LinkId, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<LinkId, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BtleTransport {
    adapter: Option<Adapter>,
    events: Events,
    resolve_timeout: Duration,
    next_id: u64,
    slots: Slots,
    watcher: Option<JoinHandle<()>>,
}

impl BtleTransport {
    /// Look up the configured adapter. A missing manager or adapter is not an
    /// error here; it makes [`Transport::initialize`] fail.
    pub async fn new(config: &LinkConfig, events: Events) -> Self {
        let adapter = match get_adapter(config.adapter_index).await {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                log::error!("unable to obtain a Bluetooth adapter: {e}");
                None
            }
        };
        Self {
            adapter,
            events,
            resolve_timeout: config.resolve_timeout(),
            next_id: 0,
            slots: Arc::new(Mutex::new(HashMap::new())),
            watcher: None,
        }
    }

    fn allocate(&mut self) -> LinkId {
        self.next_id += 1;
        LinkId(self.next_id)
    }

    fn peripheral(&self, link: LinkId) -> Result<Peripheral, TransportError> {
        lock(&self.slots)
            .get(&link)
            .and_then(|slot| slot.peripheral.clone())
            .ok_or(TransportError::UnknownLink)
    }

    fn characteristic(
        &self,
        link: LinkId,
        addr: CharacteristicAddr,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(link)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == addr.characteristic && c.service_uuid == addr.service)
            .ok_or_else(|| TransportError::AttributeNotFound(describe(&addr.characteristic)))?;
        Ok((peripheral, characteristic))
    }

    fn start_link(&mut self, link: LinkId, address: BDAddr, known: Option<Peripheral>) -> Result<(), TransportError> {
        let adapter = self.adapter.clone().ok_or(TransportError::Unavailable)?;
        // The slot must exist before the task can look it up.
        let mut slots = lock(&self.slots);
        let task = tokio::spawn(connect_task(
            link,
            adapter,
            address,
            known.clone(),
            self.resolve_timeout,
            self.slots.clone(),
            self.events.clone(),
        ));
        slots.insert(link, Slot { address, peripheral: known, task: Some(task) });
        Ok(())
    }
}

impl Transport for BtleTransport {
    fn initialize(&mut self) -> Result<(), TransportError> {
        let adapter = self.adapter.clone().ok_or(TransportError::Unavailable)?;
        if self.watcher.is_none() {
            self.watcher = Some(tokio::spawn(watch_disconnects(
                adapter,
                self.slots.clone(),
                self.events.clone(),
            )));
        }
        Ok(())
    }

    fn open(&mut self, address: &str) -> Result<LinkId, TransportError> {
        let parsed: BDAddr = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        let link = self.allocate();
        self.start_link(link, parsed, None)?;
        log::debug!("trying to create a new connection to {parsed} ({link})");
        Ok(link)
    }

    fn reopen(&mut self, link: LinkId) -> Result<LinkId, TransportError> {
        let old = lock(&self.slots).remove(&link).ok_or(TransportError::UnknownLink)?;
        if let Some(task) = old.task {
            task.abort();
        }
        let next = self.allocate();
        self.start_link(next, old.address, old.peripheral)?;
        Ok(next)
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(link)?;
        let events = self.events.clone();
        tokio::spawn(async move {
            let ok = match peripheral.discover_services().await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("discover_services failed: {e}");
                    false
                }
            };
            send(&events, link, TransportEventKind::ServicesDiscovered { ok });
        });
        Ok(())
    }

    fn services(&self, link: LinkId) -> Option<Vec<GattService>> {
        let peripheral = self.peripheral(link).ok()?;
        Some(
            peripheral
                .services()
                .into_iter()
                .map(|service| GattService {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .iter()
                        .map(|c| GattCharacteristic {
                            uuid: c.uuid,
                            properties: properties(c.properties),
                            descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
                        })
                        .collect(),
                })
                .collect(),
        )
    }

    fn set_notification(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        enabled: bool,
    ) -> Result<(), TransportError> {
        // btleplug delivers every notification through the peripheral's
        // stream, which the connect task already pumps.
        self.characteristic(link, addr)?;
        log::debug!("notification delivery for {} enabled={enabled}", describe(&addr.characteristic));
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(link, addr)?;
        let target = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| TransportError::AttributeNotFound(descriptor.to_string()))?;
        let value = value.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            // CCCD writes go through (un)subscribe so every platform backend
            // accepts them.
            let result = if descriptor == CCCD_UUID {
                if value == CccdValue::Disable.as_bytes() {
                    peripheral.unsubscribe(&characteristic).await
                } else {
                    peripheral.subscribe(&characteristic).await
                }
            } else {
                peripheral.write_descriptor(&target, &value).await
            };
            if let Err(e) = &result {
                log::warn!("descriptor write on {} failed: {e}", describe(&characteristic.uuid));
            }
            send(
                &events,
                link,
                TransportEventKind::DescriptorWritten {
                    characteristic: characteristic.uuid,
                    descriptor,
                    ok: result.is_ok(),
                },
            );
        });
        Ok(())
    }

    fn read_characteristic(&mut self, link: LinkId, addr: CharacteristicAddr) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(link, addr)?;
        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Err(TransportError::Rejected(format!(
                "{} is not readable",
                describe(&characteristic.uuid)
            )));
        }
        let events = self.events.clone();
        tokio::spawn(async move {
            let kind = match peripheral.read(&characteristic).await {
                Ok(value) => TransportEventKind::CharacteristicRead {
                    characteristic: characteristic.uuid,
                    value,
                    ok: true,
                },
                Err(e) => {
                    log::warn!("read of {} failed: {e}", describe(&characteristic.uuid));
                    TransportEventKind::CharacteristicRead {
                        characteristic: characteristic.uuid,
                        value: Vec::new(),
                        ok: false,
                    }
                }
            };
            send(&events, link, kind);
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(link, addr)?;
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else if characteristic.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            return Err(TransportError::Rejected(format!(
                "{} is not writable",
                describe(&characteristic.uuid)
            )));
        };
        let value = value.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = peripheral.write(&characteristic, &value, write_type).await;
            if let Err(e) = &result {
                log::warn!("write to {} failed: {e}", describe(&characteristic.uuid));
            }
            send(
                &events,
                link,
                TransportEventKind::CharacteristicWritten {
                    characteristic: characteristic.uuid,
                    ok: result.is_ok(),
                },
            );
        });
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        let peripheral = {
            let mut slots = lock(&self.slots);
            let Some(slot) = slots.get_mut(&link) else {
                return;
            };
            if let Some(task) = slot.task.take() {
                task.abort();
            }
            slot.peripheral.clone()
        };
        if let Some(peripheral) = peripheral {
            tokio::spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    log::debug!("disconnect: {e}");
                }
            });
        }
    }

    fn close(&mut self, link: LinkId) {
        self.disconnect(link);
        lock(&self.slots).remove(&link);
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        for (_, slot) in lock(&self.slots).drain() {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }
}

/// Get the configured Bluetooth adapter
async fn get_adapter(index: usize) -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().nth(index).ok_or(TransportError::Unavailable)
}

/// Resolve, connect, report, then pump notifications until aborted
async fn connect_task(
    link: LinkId,
    adapter: Adapter,
    address: BDAddr,
    known: Option<Peripheral>,
    resolve_timeout: Duration,
    slots: Slots,
    events: Events,
) {
    let peripheral = match known {
        Some(peripheral) => peripheral,
        None => match find_peripheral(&adapter, address, resolve_timeout).await {
            Ok(peripheral) => {
                match lock(&slots).get_mut(&link) {
                    Some(slot) => slot.peripheral = Some(peripheral.clone()),
                    None => return,
                }
                peripheral
            }
            Err(e) => {
                log::warn!("device {address} not found: {e}");
                send(&events, link, TransportEventKind::LinkDown);
                return;
            }
        },
    };

    if let Err(e) = peripheral.connect().await {
        log::warn!("connection to {address} failed: {e}");
        send(&events, link, TransportEventKind::LinkDown);
        return;
    }

    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("no notification stream for {address}: {e}");
            send(&events, link, TransportEventKind::LinkDown);
            return;
        }
    };
    send(&events, link, TransportEventKind::LinkUp);

    if let Ok(Some(props)) = peripheral.properties().await {
        if let Some(rssi) = props.rssi {
            send(&events, link, TransportEventKind::Rssi { rssi });
        }
    }

    while let Some(notification) = notifications.next().await {
        send(
            &events,
            link,
            TransportEventKind::CharacteristicChanged {
                characteristic: notification.uuid,
                value: notification.value,
            },
        );
    }
    log::debug!("notification stream for {link} ended");
}

/// Find a peripheral by address, scanning for up to `timeout` if the adapter
/// has not seen it yet
async fn find_peripheral(
    adapter: &Adapter,
    address: BDAddr,
    timeout: Duration,
) -> Result<Peripheral, TransportError> {
    if let Some(peripheral) = known_peripheral(adapter, address).await? {
        return Ok(peripheral);
    }

    adapter.start_scan(ScanFilter::default()).await?;
    let deadline = Instant::now() + timeout;
    let found = loop {
        if let Some(peripheral) = known_peripheral(adapter, address).await? {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    };
    adapter.stop_scan().await?;

    found.ok_or_else(|| TransportError::Rejected(format!("no peripheral with address {address}")))
}

async fn known_peripheral(adapter: &Adapter, address: BDAddr) -> Result<Option<Peripheral>, TransportError> {
    let peripherals = adapter.peripherals().await?;
    Ok(peripherals.into_iter().find(|p| p.address() == address))
}

/// Map adapter-level disconnects onto every live link for that peripheral
async fn watch_disconnects(adapter: Adapter, slots: Slots, events: Events) {
    let mut central_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("no adapter event stream, link loss will go unnoticed: {e}");
            return;
        }
    };
    while let Some(event) = central_events.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
            let links: Vec<LinkId> = lock(&slots)
                .iter()
                .filter(|(_, slot)| slot.peripheral.as_ref().is_some_and(|p| p.id() == id))
                .map(|(link, _)| *link)
                .collect();
            for link in links {
                send(&events, link, TransportEventKind::LinkDown);
            }
        }
    }
}

fn send(events: &Events, link: LinkId, kind: TransportEventKind) {
    if events.send(TransportEvent::new(link, kind)).is_err() {
        log::debug!("transport event receiver dropped");
    }
}

fn properties(flags: CharPropFlags) -> CharProperties {
    CharProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn describe(uuid: &Uuid) -> String {
    match name_of(uuid) {
        "" => uuid.to_string(),
        name => name.to_string(),
    }
}
