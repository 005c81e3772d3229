//! GATT attribute registry for the Starcom UART service
//!
//! The three attributes the central talks to, each with a canonical name,
//! a nickname and its 128-bit UUID. Lookups never fail loudly: a miss is
//! `None` or an empty name.

use uuid::Uuid;

/// UART service UUID: 6e400001-b5a3-f393-e0a9-e50e24dcca9e
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Read/notify characteristic UUID (peripheral TX): 6e400003-b5a3-f393-e0a9-e50e24dcca9e
pub const READ_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Write characteristic UUID (peripheral RX): 6e400002-b5a3-f393-e0a9-e50e24dcca9e
pub const WRITE_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Client Characteristic Configuration descriptor, used to arm notify/indicate
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// An addressable attribute of the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Service,
    ReadCharacteristic,
    WriteCharacteristic,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [
        Attribute::Service,
        Attribute::ReadCharacteristic,
        Attribute::WriteCharacteristic,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Attribute::Service => SERVICE_UUID,
            Attribute::ReadCharacteristic => READ_UUID,
            Attribute::WriteCharacteristic => WRITE_UUID,
        }
    }

    pub const fn canonical_name(self) -> &'static str {
        match self {
            Attribute::Service => "UART_SERVICE_UUID",
            Attribute::ReadCharacteristic => "UART_CHAR_TX_UUID",
            Attribute::WriteCharacteristic => "UART_CHAR_RX_UUID",
        }
    }

    pub const fn nickname(self) -> &'static str {
        match self {
            Attribute::Service => "SERVICE",
            Attribute::ReadCharacteristic => "READ",
            Attribute::WriteCharacteristic => "WRITE",
        }
    }

    pub fn by_canonical_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.canonical_name() == name)
    }

    pub fn by_nickname(nickname: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.nickname() == nickname)
    }

    pub fn by_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.uuid() == *uuid)
    }
}

/// Canonical name for a UUID, or an empty string if it is not one of ours
pub fn name_of(uuid: &Uuid) -> &'static str {
    Attribute::by_uuid(uuid).map(Attribute::canonical_name).unwrap_or("")
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Value written to a CCCD descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccdValue {
    EnableNotification,
    EnableIndication,
    Disable,
}

impl CccdValue {
    pub const fn as_bytes(self) -> [u8; 2] {
        match self {
            CccdValue::EnableNotification => [0x01, 0x00],
            CccdValue::EnableIndication => [0x02, 0x00],
            CccdValue::Disable => [0x00, 0x00],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_wire_strings() {
        assert_eq!(SERVICE_UUID.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(READ_UUID.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(WRITE_UUID.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn registry_round_trip() {
        for attribute in Attribute::ALL {
            let name = name_of(&attribute.uuid());
            assert_eq!(Attribute::by_canonical_name(name), Some(attribute));
        }
    }

    #[test]
    fn nicknames() {
        assert_eq!(Attribute::by_nickname("READ"), Some(Attribute::ReadCharacteristic));
        assert_eq!(Attribute::by_nickname("WRITE"), Some(Attribute::WriteCharacteristic));
        assert_eq!(Attribute::by_nickname("read"), None);
    }

    #[test]
    fn unknown_uuid_has_empty_name() {
        assert_eq!(name_of(&CCCD_UUID), "");
        assert_eq!(Attribute::by_canonical_name(""), None);
        assert_eq!(Attribute::by_canonical_name("SERVICE"), None);
    }

    #[test]
    fn cccd_values() {
        assert_eq!(CccdValue::EnableNotification.as_bytes(), [0x01, 0x00]);
        assert_eq!(CccdValue::EnableIndication.as_bytes(), [0x02, 0x00]);
    }
}
