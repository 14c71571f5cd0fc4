// Capability traits through which a Port and PortManager report events.

use std::sync::Arc;

use bytes::Bytes;

use crate::descriptor::PacketDescriptor;
use crate::port::Port;
use crate::request::Request;
use crate::Error;

/// Receives events from a single open [`Port`].
///
/// `did_receive_data` is the only method every delegate must implement; a
/// delegate that cares only about framed packets or request/response
/// transactions can ignore it and override the corresponding optional
/// method instead. All optional methods default to doing nothing, matching
/// the `@optional` methods on the original delegate protocol.
pub trait SerialPortDelegate: Send + Sync {
    /// Called with every chunk of raw bytes read off the wire, before any
    /// packet framing or request matching runs against it.
    fn did_receive_data(&self, port: &Arc<Port>, data: &Bytes);

    /// Called once the port has been removed from the system (e.g. a USB
    /// device unplugged) and before it finishes closing.
    fn was_removed_from_system(&self, port: &Arc<Port>);

    /// A complete packet matched `descriptor`.
    fn did_receive_packet(&self, _port: &Arc<Port>, _packet: &Bytes, _descriptor: &PacketDescriptor) {}

    /// `request` received a valid response.
    fn did_receive_response(&self, _port: &Arc<Port>, _response: &Bytes, _request: &Request) {}

    /// `request` timed out waiting for its response.
    fn request_did_timeout(&self, _port: &Arc<Port>, _request: &Request) {}

    /// The port encountered a non-fatal error while open (e.g. a failed
    /// write). Fatal conditions close the port and are reported here too,
    /// immediately before `was_closed`.
    fn did_encounter_error(&self, _port: &Arc<Port>, _error: &Error) {}

    fn was_opened(&self, _port: &Arc<Port>) {}

    fn was_closed(&self, _port: &Arc<Port>) {}
}

/// Receives hotplug events from a [`PortManager`](crate::manager::PortManager).
pub trait PortManagerDelegate: Send + Sync {
    fn ports_connected(&self, _ports: &[Arc<Port>]) {}

    fn ports_disconnected(&self, _ports: &[Arc<Port>]) {}
}
