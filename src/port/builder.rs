// Fluent builder for a Port's configuration, ahead of opening it.
//
// The teacher's own `BaseContextBuilder` is a type-state builder because it
// branches across genuinely different transports (serial vs. network, sync
// vs. async) chosen at runtime. A `Port` only ever has one transport per
// build (the `sync`/`async` Cargo feature already picks it at compile time),
// so the branching that justifies type-state there doesn't apply here; this
// builder is the plain fluent form the teacher's own `config.rs` enums are
// built to snap into.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BaudRate, DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use crate::port::Port;
use crate::Result;

/// Builds a [`PortConfiguration`] field by field and opens (or hands back
/// unopened) the resulting [`Port`].
#[derive(Debug, Clone)]
pub struct PortBuilder {
    path: String,
    configuration: PortConfiguration,
}

impl PortBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            configuration: PortConfiguration::default(),
        }
    }

    pub fn baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.configuration.baud_rate = baud_rate;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.configuration.parity = parity;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.configuration.data_bits = data_bits;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.configuration.stop_bits = stop_bits;
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.configuration.flow_control = flow_control;
        self
    }

    pub fn echo_received_data(mut self, should_echo: bool) -> Self {
        self.configuration.should_echo_received_data = should_echo;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.configuration.read_timeout = read_timeout;
        self
    }

    /// Builds a closed, unopened handle carrying this configuration; it is
    /// applied at the next `open()`, per spec.md §4.5.
    pub fn build_unopened(self) -> Arc<Port> {
        let port = Port::unopened(self.path);
        // `unopened` always starts from `PortConfiguration::default()`, so a
        // builder configured with non-default fields needs to push them in.
        let _ = port.set_configuration(self.configuration);
        port
    }

    /// Builds the handle and opens it immediately.
    pub fn open(self) -> Result<Arc<Port>> {
        Port::open(self.path, self.configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_unopened_stores_configuration_without_opening() {
        let port = PortBuilder::new("/dev/mock0")
            .baud_rate(BaudRate::B115200)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .build_unopened();

        assert!(!port.is_open());
        let config = port.configuration();
        assert_eq!(config.baud_rate, BaudRate::B115200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
    }
}
