// Async twin of the sync SerialTransport, built on serial2-tokio.

use std::time::Duration;

use serial2_tokio::SerialPort;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::{ModemLines, Parity, PortConfiguration, StopBits};
use crate::Error;

use super::to_serial2_settings;

pub(crate) async fn available_ports() -> Result<Vec<String>, Error> {
    Ok(SerialPort::available_ports()?
        .into_iter()
        .filter_map(|path| path.to_str().map(str::to_owned))
        .collect())
}

pub(crate) struct AsyncSerialTransport {
    port: SerialPort,
    read_timeout: Duration,
}

impl AsyncSerialTransport {
    pub(crate) fn open(path: &str, config: &PortConfiguration) -> Result<Self, Error> {
        let port = SerialPort::open(path, |mut settings: serial2::Settings| {
            to_serial2_settings(config, &mut settings);
            Ok(settings)
        })
        .map_err(|e| Error::OpenFailed { path: path.into(), reason: e.to_string() })?;
        Ok(Self { port, read_timeout: config.read_timeout })
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
        self.read_timeout = config.read_timeout;
        Ok(())
    }

    /// Reads whatever is available within the configured read timeout.
    /// Returns 0 on timeout, matching the sync adapter's polling contract.
    pub(crate) async fn read_available(&mut self, chunk: &mut [u8]) -> Result<usize, Error> {
        match timeout(self.read_timeout, self.port.read(chunk)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::ReadFailed { reason: e.to_string() }),
            Err(_elapsed) => Ok(0),
        }
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port
            .write_all(data)
            .await
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
}

impl std::fmt::Debug for AsyncSerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSerialTransport").finish_non_exhaustive()
    }
}
