use core::fmt;

/// Power state of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// The instance is powered on.
    Running,
    /// The instance is powered off.
    Stopped,
}

/// Boot devices selectable through a one-shot boot override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    /// Network boot (PXE).
    Pxe,
    /// Hard disk.
    Hdd,
    /// CD/DVD drive.
    Cd,
    /// Floppy or removable media.
    Floppy,
}

impl BootDevice {
    /// Map the boot flags device selector (boot option parameter 5,
    /// data byte 2, bits 5:2) to a device.
    pub(crate) fn from_selector(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(Self::Pxe),
            0x02 => Some(Self::Hdd),
            0x05 => Some(Self::Cd),
            0x0F => Some(Self::Floppy),
            _ => None,
        }
    }

    pub(crate) fn as_selector(self) -> u8 {
        match self {
            Self::Pxe => 0x01,
            Self::Hdd => 0x02,
            Self::Cd => 0x05,
            Self::Floppy => 0x0F,
        }
    }
}

/// Chassis control operations (Chassis NetFn, cmd 0x02).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisControl {
    /// Power down the system.
    PowerDown,
    /// Power up the system.
    PowerUp,
    /// Power cycle the system.
    PowerCycle,
    /// Hard reset the system.
    HardReset,
    /// Pulse diagnostic interrupt.
    PulseDiagnostic,
    /// ACPI soft shutdown.
    AcpiSoft,
}

impl ChassisControl {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::PowerDown),
            0x01 => Some(Self::PowerUp),
            0x02 => Some(Self::PowerCycle),
            0x03 => Some(Self::HardReset),
            0x04 => Some(Self::PulseDiagnostic),
            0x05 => Some(Self::AcpiSoft),
            _ => None,
        }
    }
}

/// A computed IPMI response body: completion code plus data bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl RawResponse {
    /// A successful response carrying `data`.
    pub fn success(data: Vec<u8>) -> Self {
        Self {
            completion_code: 0x00,
            data,
        }
    }

    /// A data-less response with the given completion code.
    pub fn completion(completion_code: u8) -> Self {
        Self {
            completion_code,
            data: Vec::new(),
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}
