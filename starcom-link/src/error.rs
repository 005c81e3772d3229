//! Error types for the link

use crate::digest::DigestError;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("no Bluetooth manager or adapter available")]
    TransportUnavailable,

    #[error("invalid peripheral address: {0:?}")]
    InvalidAddress(String),

    #[error("no open transport")]
    NotConnected,

    #[error("handshake has not completed")]
    NotAuthenticated,

    #[error("attribute not found on peripheral: {0}")]
    AttributeNotFound(String),

    #[error("transport rejected operation: {0}")]
    OperationRejectedByTransport(String),

    #[error("digest engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("a characteristic write is already in flight")]
    WriteInFlight,
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable => LinkError::TransportUnavailable,
            TransportError::InvalidAddress(addr) => LinkError::InvalidAddress(addr),
            TransportError::UnknownLink => LinkError::NotConnected,
            TransportError::AttributeNotFound(what) => LinkError::AttributeNotFound(what),
            other => LinkError::OperationRejectedByTransport(other.to_string()),
        }
    }
}

impl From<DigestError> for LinkError {
    fn from(e: DigestError) -> Self {
        match e {
            DigestError::Unavailable(msg) => LinkError::EngineUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_taxonomy() {
        assert_eq!(LinkError::from(TransportError::Unavailable), LinkError::TransportUnavailable);
        assert_eq!(LinkError::from(TransportError::UnknownLink), LinkError::NotConnected);
        assert_eq!(
            LinkError::from(TransportError::Rejected("busy".into())),
            LinkError::OperationRejectedByTransport("operation rejected: busy".into())
        );
    }
}
