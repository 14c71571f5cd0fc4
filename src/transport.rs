// OS adapter: wraps the platform serial driver behind the narrow surface
// Port and PortManager need (open/configure, line state, read/write, and
// device enumeration).

use std::io::{Read, Write};
use std::time::Duration;

use serial2::SerialPort;

use crate::config::{ModemLines, Parity, PortConfiguration, StopBits};
use crate::Error;

#[cfg(feature = "async")]
pub(crate) mod async_adapter;

/// Enumerates the serial devices currently visible to the OS, as used by
/// [`PortManager`](crate::manager::PortManager) both for its initial
/// snapshot and for each hotplug poll.
pub(crate) fn available_ports() -> Result<Vec<String>, Error> {
    Ok(SerialPort::available_ports()?
        .into_iter()
        .filter_map(|path| path.to_str().map(str::to_owned))
        .collect())
}

pub(crate) fn to_serial2_settings(config: &PortConfiguration, settings: &mut serial2::Settings) {
    settings.set_baud_rate(config.baud_rate.0).ok();
    settings.set_char_size(match config.data_bits {
        crate::config::DataBits::Five => serial2::CharSize::Bits5,
        crate::config::DataBits::Six => serial2::CharSize::Bits6,
        crate::config::DataBits::Seven => serial2::CharSize::Bits7,
        crate::config::DataBits::Eight => serial2::CharSize::Bits8,
    });
    settings.set_parity(match config.parity {
        Parity::None => serial2::Parity::None,
        Parity::Odd => serial2::Parity::Odd,
        Parity::Even => serial2::Parity::Even,
    });
    settings.set_stop_bits(match config.stop_bits {
        StopBits::One => serial2::StopBits::One,
        StopBits::Two => serial2::StopBits::Two,
    });
    settings.set_flow_control(if config.flow_control.rts_cts {
        serial2::FlowControl::RtsCts
    } else if config.flow_control.xon_xoff {
        serial2::FlowControl::XonXoff
    } else {
        serial2::FlowControl::None
    });
}

/// Narrow capability a `Port` needs from whatever is behind its OS handle:
/// read/write, modem-line control, and live reconfiguration. `Port` stores
/// this behind a `Box<dyn Transport>` rather than the concrete
/// `SerialTransport` so tests can substitute an in-memory duplex instead of
/// a real tty (see [`mock::MockTransport`]).
pub(crate) trait Transport: Send {
    fn read_available(&mut self, chunk: &mut [u8]) -> Result<usize, Error>;
    fn write_all(&mut self, data: &[u8]) -> Result<(), Error>;
    fn modem_lines(&self) -> Result<ModemLines, Error>;
    fn set_rts(&mut self, value: bool) -> Result<(), Error>;
    fn set_dtr(&mut self, value: bool) -> Result<(), Error>;
    fn reconfigure(&mut self, config: &PortConfiguration) -> Result<(), Error>;
}

/// Synchronous OS adapter for one open serial device.
pub(crate) struct SerialTransport {
    port: SerialPort,
}

impl SerialTransport {
    pub(crate) fn open(path: &str, config: &PortConfiguration) -> Result<Self, Error> {
        let port = SerialPort::open(path, |mut settings: serial2::Settings| {
            to_serial2_settings(config, &mut settings);
            Ok(settings)
        })
        .map_err(|e| Error::OpenFailed { path: path.into(), reason: e.to_string() })?;
        port.set_read_timeout(config.read_timeout).ok();
        Ok(Self { port })
    }

    pub(crate) fn reconfigure(&mut self, config: &PortConfiguration) -> Result<(), Error> {
        self.port
            .set_configuration(&|mut settings: serial2::Settings| {
                to_serial2_settings(config, &mut settings);
                Ok(settings)
            })
            .map_err(|e| Error::ConfigurationRejected {
                field: "port_configuration".into(),
                value: e.to_string(),
            })?;
        self.port.set_read_timeout(config.read_timeout).ok();
        Ok(())
    }

    /// Reads whatever is available within the configured read timeout.
    /// Returns an empty vec on timeout (the normal no-data-yet case for the
    /// receive-loop poll).
    pub(crate) fn read_available(&mut self, chunk: &mut [u8]) -> Result<usize, Error> {
        match self.port.read(chunk) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::ReadFailed { reason: e.to_string() }),
        }
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port
            .write_all(data)
            .map_err(|e| Error::WriteFailed { reason: e.to_string(), bytes_written: 0 })
    }

    pub(crate) fn modem_lines(&self) -> Result<ModemLines, Error> {
        Ok(ModemLines {
            rts: self.port.read_rts().unwrap_or(false),
            dtr: self.port.read_dtr().unwrap_or(false),
            cts: self.port.read_cts().map_err(Error::from)?,
            dsr: self.port.read_dsr().map_err(Error::from)?,
            dcd: self.port.read_cd().map_err(Error::from)?,
            ring: self.port.read_ri().map_err(Error::from)?,
        })
    }

    pub(crate) fn set_rts(&mut self, value: bool) -> Result<(), Error> {
        self.port.set_rts(value).map_err(Error::from)
    }

    pub(crate) fn set_dtr(&mut self, value: bool) -> Result<(), Error> {
        self.port.set_dtr(value).map_err(Error::from)
    }

    pub(crate) fn discard_buffers(&mut self) {
        let _ = self.port.discard_buffers();
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Duration) {
        let _ = self.port.set_read_timeout(timeout);
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport").finish_non_exhaustive()
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self, chunk: &mut [u8]) -> Result<usize, Error> {
        SerialTransport::read_available(self, chunk)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        SerialTransport::write_all(self, data)
    }

    fn modem_lines(&self) -> Result<ModemLines, Error> {
        SerialTransport::modem_lines(self)
    }

    fn set_rts(&mut self, value: bool) -> Result<(), Error> {
        SerialTransport::set_rts(self, value)
    }

    fn set_dtr(&mut self, value: bool) -> Result<(), Error> {
        SerialTransport::set_dtr(self, value)
    }

    fn reconfigure(&mut self, config: &PortConfiguration) -> Result<(), Error> {
        SerialTransport::reconfigure(self, config)
    }
}
