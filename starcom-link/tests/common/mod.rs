//! Recording mock transport for integration tests.
//!
//! Records every transport call so tests can assert on exactly what the link
//! asked the radio to do, without touching a real adapter.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use starcom_link::digest::{DigestEngine, DigestError, Token};
use starcom_link::transport::{
    CharProperties, CharacteristicAddr, GattCharacteristic, GattService, LinkId, Transport,
    TransportError, TransportEvent, TransportEventKind,
};
use starcom_link::{Link, LinkEvent};
use starcom_proto::ble::{CCCD_UUID, READ_UUID, SERVICE_UUID, WRITE_UUID};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const KEY: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
];

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize,
    Open(String),
    Reopen(LinkId),
    DiscoverServices(LinkId),
    SetNotification(LinkId, Uuid, bool),
    WriteDescriptor(LinkId, Uuid, Uuid, Vec<u8>),
    Read(LinkId, Uuid),
    Write(LinkId, Uuid, Vec<u8>),
    Disconnect(LinkId),
    Close(LinkId),
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    pub available: bool,
    pub reject_writes: bool,
    pub reject_discovery: bool,
    pub reject_descriptors: bool,
    pub services: Vec<GattService>,
    next_id: u64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            available: true,
            reject_writes: false,
            reject_discovery: false,
            reject_descriptors: false,
            services: uart_table(CharProperties { notify: true, read: true, ..Default::default() }),
            next_id: 0,
        }
    }

    /// Shared view of the call log, usable after the transport moves into a task
    pub fn recorder(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(_, _, value) => Some(value),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn allocate(&mut self) -> LinkId {
        self.next_id += 1;
        LinkId(self.next_id)
    }
}

impl Transport for MockTransport {
    fn initialize(&mut self) -> Result<(), TransportError> {
        self.record(Call::Initialize);
        if self.available { Ok(()) } else { Err(TransportError::Unavailable) }
    }

    fn open(&mut self, address: &str) -> Result<LinkId, TransportError> {
        self.record(Call::Open(address.to_string()));
        Ok(self.allocate())
    }

    fn reopen(&mut self, link: LinkId) -> Result<LinkId, TransportError> {
        self.record(Call::Reopen(link));
        Ok(self.allocate())
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        self.record(Call::DiscoverServices(link));
        if self.reject_discovery {
            return Err(TransportError::Rejected("discovery".into()));
        }
        Ok(())
    }

    fn services(&self, _link: LinkId) -> Option<Vec<GattService>> {
        Some(self.services.clone())
    }

    fn set_notification(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(Call::SetNotification(link, addr.characteristic, enabled));
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if self.reject_descriptors {
            return Err(TransportError::Rejected("descriptor write".into()));
        }
        self.record(Call::WriteDescriptor(link, addr.characteristic, descriptor, value.to_vec()));
        Ok(())
    }

    fn read_characteristic(&mut self, link: LinkId, addr: CharacteristicAddr) -> Result<(), TransportError> {
        self.record(Call::Read(link, addr.characteristic));
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        link: LinkId,
        addr: CharacteristicAddr,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if self.reject_writes {
            return Err(TransportError::Rejected("write".into()));
        }
        self.record(Call::Write(link, addr.characteristic, value.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        self.record(Call::Disconnect(link));
    }

    fn close(&mut self, link: LinkId) {
        self.record(Call::Close(link));
    }
}

/// GATT table of a peripheral exposing the UART service
pub fn uart_table(read_properties: CharProperties) -> Vec<GattService> {
    vec![GattService {
        uuid: SERVICE_UUID,
        characteristics: vec![
            GattCharacteristic {
                uuid: READ_UUID,
                properties: read_properties,
                descriptors: vec![CCCD_UUID],
            },
            GattCharacteristic {
                uuid: WRITE_UUID,
                properties: CharProperties { write: true, ..Default::default() },
                descriptors: vec![],
            },
        ],
    }]
}

/// Engine whose hash primitive is missing
pub struct BrokenEngine;

impl DigestEngine for BrokenEngine {
    fn compute_token(&self, _secret_key: &[u8], _challenge: &[u8]) -> Result<Token, DigestError> {
        Err(DigestError::Unavailable("SHA-256 not provided".into()))
    }
}

pub struct Harness<D: DigestEngine = starcom_link::Sha256Engine> {
    pub link: Link<MockTransport, D>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(MockTransport::new())
    }

    pub fn with_transport(transport: MockTransport) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let mut link = Link::new(transport, KEY.to_vec(), tx);
        link.initialize().unwrap();
        Self { link, events }
    }
}

impl<D: DigestEngine> Harness<D> {
    pub fn with_engine(engine: D) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let mut link = Link::with_engine(MockTransport::new(), engine, KEY.to_vec(), tx);
        link.initialize().unwrap();
        Self { link, events }
    }

    pub fn transport(&self) -> &MockTransport {
        self.link.transport()
    }

    /// Id of the most recently opened or reopened handle
    pub fn current(&self) -> LinkId {
        let opened = self
            .transport()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Open(_) | Call::Reopen(_)))
            .count();
        LinkId(opened as u64)
    }

    pub fn fire(&mut self, kind: TransportEventKind) {
        let link = self.current();
        self.link.handle_event(TransportEvent::new(link, kind));
    }

    pub fn drain(&mut self) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// connect → link up → discovery → notify ack, leaving the link waiting
    /// for its challenge
    pub fn arm(&mut self) {
        self.link.connect(ADDRESS).unwrap();
        self.fire(TransportEventKind::LinkUp);
        self.fire(TransportEventKind::ServicesDiscovered { ok: true });
        self.fire(TransportEventKind::DescriptorWritten {
            characteristic: READ_UUID,
            descriptor: CCCD_UUID,
            ok: true,
        });
    }

    /// Full handshake with challenge `[0x11, 0x22]`
    pub fn authenticate(&mut self) {
        self.arm();
        self.fire(TransportEventKind::CharacteristicRead {
            characteristic: READ_UUID,
            value: vec![0x11, 0x22],
            ok: true,
        });
        self.fire(TransportEventKind::CharacteristicWritten { characteristic: WRITE_UUID, ok: true });
    }
}
