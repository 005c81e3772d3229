//! Events the link emits to whoever is observing it

use std::borrow::Cow;

use starcom_proto::Command;
use uuid::Uuid;

use crate::LinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { address: String },
    Disconnected { address: String },
    /// Discovery finished and the UART attributes are present
    ServicesReady,
    /// The token write was acknowledged
    Authenticated,
    /// The token write acknowledgement reported failure
    AuthenticationFailed,
    DataAvailable(DataAvailable),
    CommandDelivered(Command),
    CommandFailed(Command),
    /// A recoverable failure; the connection stays in place
    Failure(LinkError),
}

/// A payload received from the peripheral after authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAvailable {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    /// Uppercase, space separated, for diagnostics
    pub hex: String,
}

impl DataAvailable {
    pub fn new(characteristic: Uuid, payload: Vec<u8>) -> Self {
        let hex = starcom_proto::hex_spaced(&payload);
        Self { characteristic, payload, hex }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl std::fmt::Display for DataAvailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.text(), self.hex)
    }
}
