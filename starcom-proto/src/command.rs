//! Text commands understood by the peripheral
//!
//! Each command is sent as the full value of a single write to the write
//! characteristic: its ASCII wire string, one byte per character, no framing.

/// A command from the fixed catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ReadVersion,
    Restart,
    ReadCropXState,
    CropXStateActive,
    CropXStateHibernate,
    CropXForceMeasurement,
    CropXGetMoist,
    CropXGetTemp,
    CropXGetEc,
    CropXGetQueue1,
    CropXGetQueue2,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::ReadVersion,
        Command::Restart,
        Command::ReadCropXState,
        Command::CropXStateActive,
        Command::CropXStateHibernate,
        Command::CropXForceMeasurement,
        Command::CropXGetMoist,
        Command::CropXGetTemp,
        Command::CropXGetEc,
        Command::CropXGetQueue1,
        Command::CropXGetQueue2,
    ];

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        match self {
            Command::ReadVersion => "Read version",
            Command::Restart => "Restart",
            Command::ReadCropXState => "Read CropX state",
            Command::CropXStateActive => "CropX state: Active",
            Command::CropXStateHibernate => "CropX state: Hibernate",
            Command::CropXForceMeasurement => "CropX force measurement",
            Command::CropXGetMoist => "CropX get moist",
            Command::CropXGetTemp => "CropX get temp",
            Command::CropXGetEc => "CropX get ec",
            Command::CropXGetQueue1 => "CropX get queue 1",
            Command::CropXGetQueue2 => "CropX get queue 2",
        }
    }

    /// Wire string sent to the peripheral
    pub const fn wire_value(self) -> &'static str {
        match self {
            Command::ReadVersion => "get_ver",
            Command::Restart => "restart",
            Command::ReadCropXState => "get_state",
            Command::CropXStateActive => "set_state:1",
            Command::CropXStateHibernate => "set_state:0",
            Command::CropXForceMeasurement => "cropx_measure",
            Command::CropXGetMoist => "get_cropx_moist",
            Command::CropXGetTemp => "get_cropx_temp",
            Command::CropXGetEc => "get_cropx_ec",
            Command::CropXGetQueue1 => "get_queue:1",
            Command::CropXGetQueue2 => "get_queue:2",
        }
    }

    pub fn by_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    pub fn by_wire_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.wire_value() == value)
    }

    /// Encoded value for the write characteristic
    pub fn encode(self) -> Vec<u8> {
        self.wire_value().as_bytes().to_vec()
    }

    /// Inverse of [`Command::encode`]; `None` for anything outside the catalog
    pub fn decode(data: &[u8]) -> Option<Self> {
        std::str::from_utf8(data).ok().and_then(Self::by_wire_value)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn restart_encodes_as_ascii() {
        assert_eq!(Command::Restart.encode(), b"restart".to_vec());
        assert_eq!(Command::CropXStateActive.encode(), b"set_state:1".to_vec());
    }

    #[test]
    fn catalog_round_trip() {
        for command in Command::ALL {
            assert_eq!(Command::decode(&command.encode()), Some(command));
            assert_eq!(Command::by_label(command.label()), Some(command));
        }
    }

    #[test]
    fn wire_values_are_unique() {
        let mut values: Vec<_> = Command::ALL.iter().map(|c| c.wire_value()).collect();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), Command::ALL.len());
    }

    #[test]
    fn lookups_miss_without_panicking() {
        assert_eq!(Command::by_wire_value("reboot"), None);
        assert_eq!(Command::by_wire_value(""), None);
        assert_eq!(Command::by_label("get_ver"), None);
        assert_eq!(Command::decode(&[0xff, 0xfe]), None);
    }

    #[test]
    fn display_is_label() {
        assert_eq!(Command::ReadVersion.to_string(), "Read version");
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_strings_never_panic(s in ".*") {
            if let Some(command) = Command::by_wire_value(&s) {
                proptest::prop_assert_eq!(command.wire_value(), s.as_str());
            }
        }
    }
}
