//! Connection state machine
//!
//! ```text
//! Disconnected --connect--> Connecting --LinkUp--> Unauthenticated(Discovering)
//!   Discovering        --discovered-->      ArmingNotifications  (CCCD write)
//!   ArmingNotifications --descriptor ack--> AwaitingChallenge    (read issued)
//!   AwaitingChallenge  --first payload-->   TokenInFlight        (token write)
//!   TokenInFlight      --write ack-->       Authenticated
//! any --disconnect / LinkDown--> Disconnected
//! ```
//!
//! All transitions run from a single serialized context: the caller owns the
//! `Link` and feeds it both requests and transport callbacks. Callbacks for
//! any link other than the current one are dropped.

use starcom_proto::ble::{CCCD_UUID, READ_UUID, WRITE_UUID, name_of};
use starcom_proto::{Attribute, CccdValue, Command};
use tokio::sync::mpsc;

use crate::digest::{DigestEngine, Sha256Engine};
use crate::event::{DataAvailable, LinkEvent};
use crate::transport::{
    CharacteristicAddr, GattService, LinkId, Transport, TransportEvent, TransportEventKind,
    find_characteristic,
};
use crate::LinkError;

/// Progress of the handshake while connected but not yet authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Discovering,
    ArmingNotifications,
    AwaitingChallenge,
    TokenInFlight,
    /// A step failed; `connect` with the same address restarts discovery
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ConnectedUnauthenticated(HandshakePhase),
    ConnectedAuthenticated,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectedUnauthenticated(_) | ConnectionState::ConnectedAuthenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::ConnectedAuthenticated)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::ConnectedUnauthenticated(phase) => {
                write!(f, "connected, unauthenticated ({phase:?})")
            }
            ConnectionState::ConnectedAuthenticated => write!(f, "connected, authenticated"),
        }
    }
}

/// The open transport handle and who it points at
#[derive(Debug, Clone)]
struct Session {
    address: String,
    link: LinkId,
}

/// The characteristic write currently awaiting acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    Token,
    Command(Command),
}

/// A single logical connection to a Starcom peripheral
pub struct Link<T: Transport, D: DigestEngine = Sha256Engine> {
    transport: T,
    engine: D,
    secret_key: Vec<u8>,
    events: mpsc::UnboundedSender<LinkEvent>,
    initialized: bool,
    session: Option<Session>,
    state: ConnectionState,
    pending_write: Option<PendingWrite>,
}

impl<T: Transport> Link<T, Sha256Engine> {
    pub fn new(transport: T, secret_key: Vec<u8>, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self::with_engine(transport, Sha256Engine, secret_key, events)
    }
}

impl<T: Transport, D: DigestEngine> Link<T, D> {
    pub fn with_engine(
        transport: T,
        engine: D,
        secret_key: Vec<u8>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            transport,
            engine,
            secret_key,
            events,
            initialized: false,
            session: None,
            state: ConnectionState::Disconnected,
            pending_write: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Address of the current (or last) peripheral, while a handle is open
    pub fn address(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.address.as_str())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Acquire the platform transport. `connect` is refused until this succeeds.
    pub fn initialize(&mut self) -> Result<(), LinkError> {
        if let Err(e) = self.transport.initialize() {
            log::error!("unable to initialize Bluetooth transport: {e}");
            return Err(e.into());
        }
        self.initialized = true;
        Ok(())
    }

    /// Start connecting to `address`. `Ok` means the request was accepted;
    /// the outcome arrives as `Connected` or `Disconnected`.
    pub fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        if !self.initialized {
            log::warn!("transport not initialized");
            return Err(LinkError::TransportUnavailable);
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(LinkError::InvalidAddress(address.to_string()));
        }

        if let Some(session) = self.session.clone() {
            if session.address == address {
                return self.resume(session);
            }
            log::info!("switching peripheral {} -> {address}", session.address);
            self.teardown(session);
        }

        let link = self.transport.open(address).map_err(|e| {
            log::warn!("unable to open transport to {address}: {e}");
            LinkError::from(e)
        })?;
        log::info!("connecting to {address} ({link})");
        self.session = Some(Session { address: address.to_string(), link });
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    fn resume(&mut self, session: Session) -> Result<(), LinkError> {
        match self.state {
            ConnectionState::Disconnected => {
                log::debug!("trying to use the existing handle for {}", session.address);
                let link = self.transport.reopen(session.link).map_err(LinkError::from)?;
                self.session = Some(Session { link, ..session });
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            ConnectionState::ConnectedUnauthenticated(HandshakePhase::Stalled) => {
                log::info!("restarting handshake with {}", session.address);
                self.start_discovery(session.link);
                Ok(())
            }
            state => {
                log::debug!("connect({}) ignored, already {state}", session.address);
                Ok(())
            }
        }
    }

    /// Drop the radio link. The handle is kept so a later `connect` to the
    /// same address resumes it. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            log::debug!("disconnect ignored, already disconnected");
            return;
        }
        if let Some(session) = &self.session {
            self.transport.disconnect(session.link);
        }
        self.enter_disconnected();
    }

    /// Disconnect and release the transport handle
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if self.state != ConnectionState::Disconnected {
                self.transport.disconnect(session.link);
                self.emit_disconnected(&session.address);
            }
            self.transport.close(session.link);
        }
        self.state = ConnectionState::Disconnected;
        self.pending_write = None;
    }

    fn teardown(&mut self, session: Session) {
        if self.state != ConnectionState::Disconnected {
            self.transport.disconnect(session.link);
            self.enter_disconnected();
        }
        self.transport.close(session.link);
        self.session = None;
    }

    /// Write an application command. Only allowed once authenticated.
    pub fn send_command(&mut self, command: Command) -> Result<(), LinkError> {
        let link = match (self.state, &self.session) {
            (ConnectionState::ConnectedAuthenticated, Some(session)) => session.link,
            (ConnectionState::ConnectedUnauthenticated(_), Some(_)) => {
                return Err(LinkError::NotAuthenticated);
            }
            _ => return Err(LinkError::NotConnected),
        };
        if self.pending_write.is_some() {
            return Err(LinkError::WriteInFlight);
        }
        log::info!("sending command {:?} ({})", command.wire_value(), command.label());
        self.write(link, &command.encode(), PendingWrite::Command(command))
    }

    /// GATT table of the open handle, `None` when no handle is open
    pub fn supported_services(&self) -> Option<Vec<GattService>> {
        self.session.as_ref().and_then(|s| self.transport.services(s.link))
    }

    /// Feed a transport completion into the state machine
    pub fn handle_event(&mut self, event: TransportEvent) {
        let Some(link) = self.session.as_ref().map(|s| s.link) else {
            log::debug!("no open handle, dropping {:?} from {}", event.kind, event.link);
            return;
        };
        if event.link != link {
            log::debug!("stale callback from {} (current {link}): {:?}", event.link, event.kind);
            return;
        }
        if self.state == ConnectionState::Disconnected {
            log::debug!("disconnected, dropping {:?}", event.kind);
            return;
        }

        match event.kind {
            TransportEventKind::LinkUp => self.on_link_up(link),
            TransportEventKind::LinkDown => self.on_link_down(),
            TransportEventKind::ServicesDiscovered { ok } => self.on_services_discovered(link, ok),
            TransportEventKind::DescriptorWritten { characteristic, descriptor, ok } => {
                self.on_descriptor_written(link, characteristic, descriptor, ok)
            }
            TransportEventKind::CharacteristicRead { characteristic, value, ok } => {
                if ok {
                    self.on_payload(link, characteristic, value);
                } else {
                    self.on_read_failed(characteristic);
                }
            }
            TransportEventKind::CharacteristicChanged { characteristic, value } => {
                self.on_payload(link, characteristic, value)
            }
            TransportEventKind::CharacteristicWritten { characteristic, ok } => {
                self.on_write_complete(characteristic, ok)
            }
            TransportEventKind::Rssi { rssi } => log::debug!("RSSI: {rssi}"),
        }
    }

    fn on_link_up(&mut self, link: LinkId) {
        if self.state != ConnectionState::Connecting {
            log::debug!("link up while {}, ignored", self.state);
            return;
        }
        log::info!("connected to GATT server");
        self.emit(LinkEvent::Connected { address: self.address().unwrap_or_default().to_string() });
        self.start_discovery(link);
    }

    fn start_discovery(&mut self, link: LinkId) {
        self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::Discovering);
        if let Err(e) = self.transport.discover_services(link) {
            log::warn!("unable to start service discovery: {e}");
            self.stall(e.into());
        }
    }

    fn on_link_down(&mut self) {
        log::info!("disconnected from GATT server");
        self.enter_disconnected();
    }

    fn on_services_discovered(&mut self, link: LinkId, ok: bool) {
        if self.state != ConnectionState::ConnectedUnauthenticated(HandshakePhase::Discovering) {
            log::debug!("services discovered while {}, ignored", self.state);
            return;
        }
        if !ok {
            log::warn!("service discovery failed");
            self.stall(LinkError::OperationRejectedByTransport("service discovery failed".into()));
            return;
        }
        if let Err(e) = self.arm_notifications(link) {
            log::error!("failed to arm notifications: {e}");
            self.stall(e);
        }
    }

    /// Check the live GATT table, then register and write the CCCD of the
    /// read characteristic. Notify is preferred over indicate.
    fn arm_notifications(&mut self, link: LinkId) -> Result<(), LinkError> {
        let services = self.transport.services(link).unwrap_or_default();
        let read = CharacteristicAddr::of(Attribute::ReadCharacteristic);
        let write = CharacteristicAddr::of(Attribute::WriteCharacteristic);

        if find_characteristic(&services, &write).is_none() {
            return Err(LinkError::AttributeNotFound(Attribute::WriteCharacteristic.to_string()));
        }
        let characteristic = find_characteristic(&services, &read)
            .ok_or_else(|| LinkError::AttributeNotFound(Attribute::ReadCharacteristic.to_string()))?;
        if !characteristic.descriptors.contains(&CCCD_UUID) {
            return Err(LinkError::AttributeNotFound(format!(
                "{CCCD_UUID} on {}",
                Attribute::ReadCharacteristic
            )));
        }
        let value = if characteristic.properties.notify {
            log::debug!("{} set NOTIFY", Attribute::ReadCharacteristic);
            CccdValue::EnableNotification
        } else if characteristic.properties.indicate {
            log::debug!("{} set INDICATE", Attribute::ReadCharacteristic);
            CccdValue::EnableIndication
        } else {
            return Err(LinkError::AttributeNotFound(format!(
                "NOTIFY or INDICATE property on {}",
                Attribute::ReadCharacteristic
            )));
        };

        self.transport.set_notification(link, read, true)?;
        self.transport.write_descriptor(link, read, CCCD_UUID, &value.as_bytes())?;
        log::info!("services ready, arming notifications");
        self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::ArmingNotifications);
        self.emit(LinkEvent::ServicesReady);
        Ok(())
    }

    fn on_descriptor_written(&mut self, link: LinkId, characteristic: uuid::Uuid, descriptor: uuid::Uuid, ok: bool) {
        if self.state != ConnectionState::ConnectedUnauthenticated(HandshakePhase::ArmingNotifications)
            || characteristic != READ_UUID
            || descriptor != CCCD_UUID
        {
            log::debug!("descriptor {descriptor} of {characteristic} written while {}, ignored", self.state);
            return;
        }
        if !ok {
            log::error!("failed to set client characteristic notification for {}", name_of(&characteristic));
            self.stall(LinkError::OperationRejectedByTransport("enabling notifications failed".into()));
            return;
        }

        log::info!("notifications armed, waiting for challenge");
        self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::AwaitingChallenge);
        // The challenge may still arrive as a notification, so a failed read
        // leaves us waiting.
        let read = CharacteristicAddr::of(Attribute::ReadCharacteristic);
        if let Err(e) = self.transport.read_characteristic(link, read) {
            log::error!("reading {} failed: {e}", Attribute::ReadCharacteristic);
            self.emit(LinkEvent::Failure(e.into()));
        }
    }

    fn on_payload(&mut self, link: LinkId, characteristic: uuid::Uuid, value: Vec<u8>) {
        match self.state {
            ConnectionState::ConnectedAuthenticated => {
                let data = DataAvailable::new(characteristic, value);
                log::debug!("data available: {}", data.hex);
                self.emit(LinkEvent::DataAvailable(data));
            }
            ConnectionState::ConnectedUnauthenticated(HandshakePhase::AwaitingChallenge) => {
                if characteristic != READ_UUID || value.is_empty() {
                    log::debug!("not a challenge: {} bytes from {characteristic}", value.len());
                    return;
                }
                self.answer_challenge(link, &value);
            }
            state => {
                log::debug!("dropping {} byte payload received while {state}", value.len());
            }
        }
    }

    fn on_read_failed(&mut self, characteristic: uuid::Uuid) {
        log::error!("read of {} failed", name_of(&characteristic));
        match self.state {
            ConnectionState::ConnectedUnauthenticated(HandshakePhase::AwaitingChallenge)
            | ConnectionState::ConnectedAuthenticated => {
                self.emit(LinkEvent::Failure(LinkError::OperationRejectedByTransport(format!(
                    "read of {characteristic} failed"
                ))));
            }
            state => log::debug!("read failure while {state}, not reported"),
        }
    }

    fn answer_challenge(&mut self, link: LinkId, challenge: &[u8]) {
        let token = match self.engine.compute_token(&self.secret_key, challenge) {
            Ok(token) => token,
            Err(e) => {
                log::error!("cannot compute token: {e}");
                self.stall(e.into());
                return;
            }
        };
        log::debug!(
            "challenge {} -> token {}",
            starcom_proto::hex_spaced(challenge),
            starcom_proto::hex_spaced(&token)
        );

        match self.write(link, &token, PendingWrite::Token) {
            Ok(()) => {
                log::info!("token sent, waiting for acknowledgement");
                self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::TokenInFlight);
            }
            // Nothing was transmitted, so the next challenge is answered again.
            Err(e) => self.emit(LinkEvent::Failure(e)),
        }
    }

    fn on_write_complete(&mut self, characteristic: uuid::Uuid, ok: bool) {
        if characteristic != WRITE_UUID {
            log::debug!("write completion for {characteristic} ignored");
            return;
        }
        let Some(pending) = self.pending_write.take() else {
            log::debug!("unexpected write completion for {characteristic}");
            return;
        };
        match pending {
            PendingWrite::Token => {
                if self.state != ConnectionState::ConnectedUnauthenticated(HandshakePhase::TokenInFlight) {
                    return;
                }
                if ok {
                    log::info!("authenticated");
                    self.state = ConnectionState::ConnectedAuthenticated;
                    self.emit(LinkEvent::Authenticated);
                } else {
                    log::error!("token write failed");
                    self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::Stalled);
                    self.emit(LinkEvent::AuthenticationFailed);
                }
            }
            PendingWrite::Command(command) => {
                if ok {
                    self.emit(LinkEvent::CommandDelivered(command));
                } else {
                    log::error!("write of {:?} failed", command.wire_value());
                    self.emit(LinkEvent::CommandFailed(command));
                }
            }
        }
    }

    fn write(&mut self, link: LinkId, value: &[u8], pending: PendingWrite) -> Result<(), LinkError> {
        let addr = CharacteristicAddr::of(Attribute::WriteCharacteristic);
        if let Err(e) = self.transport.write_characteristic(link, addr, value) {
            log::error!("write to {} rejected: {e}", Attribute::WriteCharacteristic);
            return Err(e.into());
        }
        self.pending_write = Some(pending);
        Ok(())
    }

    fn stall(&mut self, error: LinkError) {
        self.state = ConnectionState::ConnectedUnauthenticated(HandshakePhase::Stalled);
        self.emit(LinkEvent::Failure(error));
    }

    fn enter_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.pending_write = None;
        let address = self.address().unwrap_or_default().to_string();
        self.emit_disconnected(&address);
    }

    fn emit_disconnected(&self, address: &str) {
        self.emit(LinkEvent::Disconnected { address: address.to_string() });
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            log::debug!("no event listener");
        }
    }
}
