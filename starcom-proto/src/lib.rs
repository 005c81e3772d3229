//! Starcom wire protocol - GATT attribute addressing and the command catalog
//!
//! The peripheral exposes a UART-like GATT service with one write
//! characteristic and one read/notify characteristic. Everything the central
//! needs to address those attributes and encode commands lives here, with no
//! async or platform dependencies.

pub mod ble;
pub mod command;

pub use ble::{Attribute, CCCD_UUID, CccdValue};
pub use command::Command;

/// Render bytes as uppercase hex pairs separated by single spaces, e.g. `"0A FF 10"`
pub fn hex_spaced(data: &[u8]) -> String {
    data.iter()
        .map(|b| data_encoding::HEXUPPER.encode(&[*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #[test]
    fn hex_spaced() {
        assert_eq!(super::hex_spaced(&[]), "");
        assert_eq!(super::hex_spaced(&[0x0a]), "0A");
        assert_eq!(super::hex_spaced(&[0x11, 0x22, 0xff]), "11 22 FF");
        assert!(!super::hex_spaced(&[0x00, 0xab]).ends_with(' '));
    }
}
