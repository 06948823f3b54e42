/// Application boot slot.
///
/// The device keeps two application partitions and boots from one of them
/// while the other is free to receive a new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSlot {
    Ota0,
    Ota1,
}

impl BootSlot {
    /// The slot the other partition occupies.
    pub const fn other(self) -> Self {
        match self {
            BootSlot::Ota0 => BootSlot::Ota1,
            BootSlot::Ota1 => BootSlot::Ota0,
        }
    }

    /// Partition label of the slot.
    pub const fn as_str(self) -> &'static str {
        match self {
            BootSlot::Ota0 => "ota_0",
            BootSlot::Ota1 => "ota_1",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            BootSlot::Ota0 => 0,
            BootSlot::Ota1 => 1,
        }
    }
}

/// Firmware distribution endpoint identifier.
///
/// Two mirrors publish every release. Which one is asked first is a stored
/// preference; the resolver falls back to the other when the preferred one
/// does not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceId {
    Primary,
    Secondary,
}

impl SourceId {
    pub const fn other(self) -> Self {
        match self {
            SourceId::Primary => SourceId::Secondary,
            SourceId::Secondary => SourceId::Primary,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SourceId::Primary => "primary",
            SourceId::Secondary => "secondary",
        }
    }

    /// Parse a source name as accepted on the console, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("primary") {
            Some(SourceId::Primary)
        } else if value.eq_ignore_ascii_case("secondary") {
            Some(SourceId::Secondary)
        } else {
            None
        }
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            SourceId::Primary => 0,
            SourceId::Secondary => 1,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SourceId::Primary),
            1 => Some(SourceId::Secondary),
            _ => None,
        }
    }
}
