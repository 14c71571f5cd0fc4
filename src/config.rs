// Serial line configuration types: baud rate, parity, stop bits, flow
// control, and the read-echo flag.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Line speed in bits per second. Non-standard rates are accepted and
/// passed straight to the OS driver; whether the driver honors them is
/// platform-dependent, matching the original's tolerant `baudRate` setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display("{_0}")]
pub struct BaudRate(pub u32);

impl BaudRate {
    pub const B9600: BaudRate = BaudRate(9600);
    pub const B19200: BaudRate = BaudRate(19200);
    pub const B38400: BaudRate = BaudRate(38400);
    pub const B57600: BaudRate = BaudRate(57600);
    pub const B115200: BaudRate = BaudRate(115_200);
}

impl FromStr for BaudRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(BaudRate)
            .map_err(|_| Error::ConfigurationRejected {
                field: "baud_rate".into(),
                value: s.into(),
            })
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            _ => Err(Error::ConfigurationRejected {
                field: "parity".into(),
                value: s.into(),
            }),
        }
    }
}

/// Number of stop bits per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum StopBits {
    One,
    Two,
}

impl FromStr for StopBits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "one" => Ok(Self::One),
            "2" | "two" => Ok(Self::Two),
            _ => Err(Error::ConfigurationRejected {
                field: "stop_bits".into(),
                value: s.into(),
            }),
        }
    }
}

/// Number of data bits per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Hardware and software flow control lines honored when opening a port.
/// Matches the independent `rts/cts`, `dtr/dsr`, and `dcd` toggles on the
/// original `ORSSerialPort`, plus the POSIX XON/XOFF flags the teacher's
/// serial adapter also exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowControl {
    pub rts_cts: bool,
    pub dtr_dsr: bool,
    pub dcd: bool,
    pub xon_xoff: bool,
}

impl FlowControl {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn rts_cts() -> Self {
        Self {
            rts_cts: true,
            ..Self::default()
        }
    }
}

/// Immutable snapshot of everything needed to open and configure a port.
///
/// Mutating a field on an already-open [`Port`](crate::port::Port) applies
/// immediately; mutating a closed port's configuration is deferred until
/// the next `open()`, as in spec.md §4.5.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfiguration {
    pub baud_rate: BaudRate,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Bytes written while open are also delivered back through
    /// `did_receive_data`, mirroring RS-232 local echo testing setups.
    pub should_echo_received_data: bool,
    /// How long a read may block the receive-loop thread before it's
    /// retried; not part of the wire protocol.
    pub read_timeout: Duration,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::none(),
            should_echo_received_data: false,
            read_timeout: Duration::from_millis(200),
        }
    }
}

impl Display for PortConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.data_bits),
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            match self.stop_bits {
                StopBits::One => 1,
                StopBits::Two => 2,
            }
        )
    }
}

/// Read-only modem control/status line state, as returned by a port.
///
/// `rts` and `dtr` are writable outputs; `cts`, `dsr`, `dcd`, and `ri` are
/// read-only inputs reflecting the line driver's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemLines {
    pub rts: bool,
    pub dtr: bool,
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
    pub ring: bool,
}
