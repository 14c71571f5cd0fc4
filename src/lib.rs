//! A hotplug-aware serial port library with packet framing and
//! request/response transactions.
//!
//! `serialcraft` opens serial devices, tracks their arrival and removal,
//! and lets callers describe the shape of the packets or responses they
//! expect to receive so framing and request/response bookkeeping never has
//! to be reimplemented per protocol.
//!
//! # Example
//! This example opens a port, registers a newline-terminated packet
//! descriptor, and sends a request expecting a digit-then-carriage-return
//! response.
//!
//! ```no_run
//! use serialcraft::{Port, PacketDescriptor, UserInfo};
//! use std::sync::Arc;
//!
//! # fn example() -> serialcraft::Result<()> {
//! let port = Port::open("/dev/cu.usbserial-A1", Default::default())?;
//! port.add_packet_descriptor(PacketDescriptor::with_prefix_suffix("", "\n", UserInfo::none()));
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod delegate;
pub(crate) mod executor;
pub mod descriptor;
pub mod manager;
pub(crate) mod matcher;
pub mod port;
pub mod request;
pub(crate) mod transport;
pub mod user_info;

pub use config::{BaudRate, DataBits, FlowControl, ModemLines, Parity, PortConfiguration, StopBits};
pub use delegate::{PortManagerDelegate, SerialPortDelegate};
pub use descriptor::PacketDescriptor;
pub use manager::PortManager;
pub use port::{Port, PortBuilder};
pub use request::{Request, RequestQueue};
pub use user_info::UserInfo;

use thiserror::Error;

/// Everything that can go wrong while opening, configuring, or using a
/// port.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("write failed after {bytes_written} bytes: {reason}")]
    WriteFailed { reason: String, bytes_written: usize },

    #[error("read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("device was removed from the system")]
    DeviceRemoved,

    #[error("configuration rejected for {field}: {value}")]
    ConfigurationRejected { field: String, value: String },

    #[error("operation attempted on a closed port")]
    PortClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
