//! The BLE transport capability the link is driven through.
//!
//! Every operation is fire-and-forget: the call only reports whether the
//! platform accepted the request. The outcome arrives later as a
//! [`TransportEvent`] tagged with the [`LinkId`] it belongs to, which the
//! owner feeds back into [`Link::handle_event`](crate::Link::handle_event).

#[cfg(feature = "btleplug")]
pub mod btle;

use starcom_proto::Attribute;
use uuid::Uuid;

/// Identity of one transport handle. A resumed handle gets a fresh id, so
/// callbacks from an earlier attempt can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A characteristic, addressed by its service and its own UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicAddr {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicAddr {
    /// Address of a characteristic within the UART service
    pub const fn of(attribute: Attribute) -> Self {
        Self {
            service: Attribute::Service.uuid(),
            characteristic: attribute.uuid(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharProperties,
    pub descriptors: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Find a characteristic in a discovered GATT table
pub fn find_characteristic<'a>(
    services: &'a [GattService],
    addr: &CharacteristicAddr,
) -> Option<&'a GattCharacteristic> {
    services
        .iter()
        .filter(|s| s.uuid == addr.service)
        .flat_map(|s| s.characteristics.iter())
        .find(|c| c.uuid == addr.characteristic)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub link: LinkId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(link: LinkId, kind: TransportEventKind) -> Self {
        Self { link, kind }
    }
}

/// Completion callbacks from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    LinkUp,
    LinkDown,
    ServicesDiscovered { ok: bool },
    DescriptorWritten { characteristic: Uuid, descriptor: Uuid, ok: bool },
    CharacteristicRead { characteristic: Uuid, value: Vec<u8>, ok: bool },
    CharacteristicWritten { characteristic: Uuid, ok: bool },
    CharacteristicChanged { characteristic: Uuid, value: Vec<u8> },
    Rssi { rssi: i16 },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no Bluetooth manager or adapter available")]
    Unavailable,
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("unknown or closed link")]
    UnknownLink,
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
    #[cfg(feature = "btleplug")]
    #[error("platform error: {0}")]
    Platform(#[from] btleplug::Error),
}

/// Platform BLE stack as seen by the link
pub trait Transport {
    /// Acquire the platform manager/adapter. Failure is fatal for the link.
    fn initialize(&mut self) -> Result<(), TransportError>;

    /// Start connecting to `address`; completion is `LinkUp` or `LinkDown`.
    fn open(&mut self, address: &str) -> Result<LinkId, TransportError>;

    /// Reconnect an existing handle, returning its new identity.
    fn reopen(&mut self, link: LinkId) -> Result<LinkId, TransportError>;

    /// Completion is `ServicesDiscovered`.
    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError>;

    /// The discovered GATT table, `None` if the link is unknown.
    fn services(&self, link: LinkId) -> Option<Vec<GattService>>;

    /// Register local delivery of notifications for a characteristic. Synchronous.
    fn set_notification(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        enabled: bool,
    ) -> Result<(), TransportError>;

    /// Completion is `DescriptorWritten`.
    fn write_descriptor(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Completion is `CharacteristicRead`.
    fn read_characteristic(&mut self, link: LinkId, addr: CharacteristicAddr) -> Result<(), TransportError>;

    /// Completion is `CharacteristicWritten`.
    fn write_characteristic(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Drop the radio link but keep the handle for `reopen`.
    fn disconnect(&mut self, link: LinkId);

    /// Release the handle.
    fn close(&mut self, link: LinkId);
}
