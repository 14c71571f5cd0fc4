// The Port state machine: open/close, reads, writes, and the receive loop
// that drives packet matching and request/response bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use log::{debug, warn};

use crate::buffer::Buffer;
use crate::config::{ModemLines, PortConfiguration};
use crate::delegate::SerialPortDelegate;
use crate::descriptor::PacketDescriptor;
use crate::executor;
use crate::matcher::PacketMatcher;
use crate::request::{QueueEvent, Request, RequestQueue, SentOutcome};
use crate::transport::{SerialTransport, Transport};
use crate::{Error, Result};

pub mod builder;
pub use builder::PortBuilder;

const DEFAULT_BUFFER_LENGTH: usize = 64 * 1024;
const RECEIVE_CHUNK_SIZE: usize = 512;

/// A Port's position in the state machine from spec.md §4.5.
///
/// `Removed` is terminal and reachable from any other state; a caller must
/// obtain a fresh `Port` from the [`PortManager`](crate::manager::PortManager)
/// to reopen the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Closed,
    Opening,
    Open,
    Closing,
    Removed,
}

struct ReceiveLoop {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// A software handle over one OS serial device.
///
/// Exclusively owns its OS file handle, receive buffer, registered packet
/// descriptors, and request queue. Always reached through an `Arc` so the
/// receive-loop thread and delegate callbacks can share ownership with the
/// caller.
pub struct Port {
    path: String,
    state: Mutex<PortState>,
    config: Mutex<PortConfiguration>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    buffer: Mutex<Buffer>,
    matcher: Mutex<PacketMatcher>,
    request_queue: Mutex<RequestQueue>,
    delegate: Mutex<Option<Weak<dyn SerialPortDelegate>>>,
    receive_loop: Mutex<Option<ReceiveLoop>>,
}

impl Port {
    /// Builds a closed, unopened handle for `path`. Used by the manager to
    /// vend handles for enumerated devices before anyone opens them.
    pub(crate) fn unopened(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: Mutex::new(PortState::Closed),
            config: Mutex::new(PortConfiguration::default()),
            transport: Mutex::new(None),
            buffer: Mutex::new(Buffer::new(DEFAULT_BUFFER_LENGTH)),
            matcher: Mutex::new(PacketMatcher::new()),
            request_queue: Mutex::new(RequestQueue::new()),
            delegate: Mutex::new(None),
            receive_loop: Mutex::new(None),
        })
    }

    /// Convenience constructor: builds a handle for `path` and opens it
    /// immediately with `configuration`.
    pub fn open(path: impl Into<String>, configuration: PortConfiguration) -> Result<Arc<Self>> {
        let port = Self::unopened(path);
        *port.config.lock().unwrap() = configuration;
        port.clone().open_self()?;
        Ok(port)
    }

    /// Builds a handle already in the `Open` state around `transport`,
    /// bypassing the OS adapter entirely. Used by unit tests to drive the
    /// receive loop, matcher, and request queue against an in-memory
    /// duplex instead of a real tty.
    #[cfg(test)]
    pub(crate) fn open_with_transport(
        path: impl Into<String>,
        configuration: PortConfiguration,
        transport: Box<dyn Transport>,
    ) -> Arc<Self> {
        let port = Self::unopened(path);
        *port.config.lock().unwrap() = configuration;
        *port.transport.lock().unwrap() = Some(transport);
        *port.state.lock().unwrap() = PortState::Open;
        port.spawn_receive_loop();
        port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> PortState {
        *self.state.lock().unwrap()
    }

    pub fn is_open(&self) -> bool {
        self.state() == PortState::Open
    }

    pub fn configuration(&self) -> PortConfiguration {
        self.config.lock().unwrap().clone()
    }

    pub fn set_delegate(&self, delegate: &Arc<dyn SerialPortDelegate>) {
        *self.delegate.lock().unwrap() = Some(Arc::downgrade(delegate));
    }

    pub fn add_packet_descriptor(&self, descriptor: PacketDescriptor) {
        self.matcher.lock().unwrap().register(descriptor);
    }

    pub fn remove_packet_descriptor(&self, uuid: uuid::Uuid) {
        self.matcher.lock().unwrap().unregister(uuid);
    }

    /// Opens the underlying OS device and spawns the receive loop.
    pub fn open_self(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != PortState::Closed {
                return Err(Error::PortClosed);
            }
            *state = PortState::Opening;
        }

        let config = self.config.lock().unwrap().clone();
        let transport = match SerialTransport::open(&self.path, &config) {
            Ok(t) => t,
            Err(e) => {
                *self.state.lock().unwrap() = PortState::Closed;
                self.dispatch_error(e);
                return Err(Error::OpenFailed { path: self.path.clone(), reason: "see prior error".into() });
            }
        };
        *self.transport.lock().unwrap() = Some(Box::new(transport));
        *self.state.lock().unwrap() = PortState::Open;
        self.spawn_receive_loop();
        self.dispatch(|d, p| d.was_opened(p));
        debug!("port {} opened", self.path);
        Ok(())
    }

    /// Begins closing: stops the receive loop and releases the OS handle.
    /// Pending and in-flight requests fail with `portClosed`.
    pub fn close(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != PortState::Open {
                return Ok(());
            }
            *state = PortState::Closing;
        }
        self.stop_receive_loop();
        self.transport.lock().unwrap().take();
        self.fail_all_requests();
        *self.state.lock().unwrap() = PortState::Closed;
        self.dispatch(|d, p| d.was_closed(p));
        debug!("port {} closed", self.path);
        Ok(())
    }

    /// Writes `data` to the wire right away, bypassing the request queue.
    /// Returns `false` and reports `did_encounter_error` on failure.
    pub fn send_data(self: &Arc<Self>, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        if !self.is_open() {
            self.dispatch_error(Error::PortClosed);
            return false;
        }
        match self.write_now(&data) {
            Ok(()) => {
                if self.config.lock().unwrap().should_echo_received_data {
                    self.dispatch(move |d, p| d.did_receive_data(p, &data));
                }
                true
            }
            Err(e) => {
                self.dispatch_error(e);
                false
            }
        }
    }

    /// Enqueues `request`. If nothing is ahead of it, writes its bytes
    /// immediately.
    pub fn send_request(self: &Arc<Self>, request: Request) -> bool {
        if !self.is_open() {
            // Rejected outright: nothing is enqueued, so a request the
            // caller was told failed can never resurface and get written
            // once the port is later reopened.
            self.dispatch_error(Error::PortClosed);
            return false;
        }
        let ready = self.request_queue.lock().unwrap().enqueue(request);
        if let Some(ready) = ready {
            self.write_request(ready);
        }
        true
    }

    fn write_request(self: &Arc<Self>, request: Request) {
        let data = request.data_to_send().clone();
        let write_result = self.write_now(&data);
        match write_result {
            Ok(()) => match self.request_queue.lock().unwrap().mark_sent(request) {
                SentOutcome::AwaitingResponse => {}
                SentOutcome::CompletedImmediately(Some(next)) => self.write_request(next),
                SentOutcome::CompletedImmediately(None) => {}
            },
            Err(e) => {
                // `request` never reached `mark_sent` and was already popped
                // off `pending` by `enqueue`'s `try_advance`, so this is the
                // only place its failure can be reported. Per spec.md §4.5 a
                // failed `sendData` only emits `error(writeFailed)` — the
                // port stays open and the rest of the queue is untouched, so
                // advance straight to whatever is next in line.
                self.dispatch_error(e);
                let _ = request;
                if let Some(next) = self.request_queue.lock().unwrap().advance() {
                    self.write_request(next);
                }
            }
        }
    }

    fn write_now(&self, data: &[u8]) -> Result<()> {
        let mut transport = self.transport.lock().unwrap();
        match transport.as_mut() {
            Some(t) => t.write_all(data),
            None => Err(Error::PortClosed),
        }
    }

    pub fn modem_lines(&self) -> Result<ModemLines> {
        let transport = self.transport.lock().unwrap();
        transport.as_ref().ok_or(Error::PortClosed)?.modem_lines()
    }

    pub fn set_rts(&self, value: bool) -> Result<()> {
        let mut transport = self.transport.lock().unwrap();
        transport.as_mut().ok_or(Error::PortClosed)?.set_rts(value)
    }

    pub fn set_dtr(&self, value: bool) -> Result<()> {
        let mut transport = self.transport.lock().unwrap();
        transport.as_mut().ok_or(Error::PortClosed)?.set_dtr(value)
    }

    /// Applies `configuration` immediately if open; otherwise stores it for
    /// the next `open()`, per spec.md §4.5. On rejection, the in-memory
    /// value reverts to whatever was previously applied.
    pub fn set_configuration(&self, configuration: PortConfiguration) -> Result<()> {
        let previous = self.config.lock().unwrap().clone();
        *self.config.lock().unwrap() = configuration.clone();
        if self.is_open() {
            let mut transport = self.transport.lock().unwrap();
            if let Some(t) = transport.as_mut() {
                if let Err(e) = t.reconfigure(&configuration) {
                    *self.config.lock().unwrap() = previous;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn spawn_receive_loop(self: &Arc<Self>) {
        let stop = Arc::new(AtomicBool::new(false));
        let port = self.clone();
        let stop_clone = stop.clone();
        let join = thread::Builder::new()
            .name(format!("serialcraft-rx-{}", self.path))
            .spawn(move || port.receive_loop_body(&stop_clone))
            .expect("failed to spawn receive-loop thread");
        *self.receive_loop.lock().unwrap() = Some(ReceiveLoop { stop, join: Some(join) });
    }

    fn stop_receive_loop(&self) {
        if let Some(mut handle) = self.receive_loop.lock().unwrap().take() {
            handle.stop.store(true, Ordering::SeqCst);
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }

    fn receive_loop_body(self: Arc<Self>, stop: &AtomicBool) {
        let mut chunk = [0u8; RECEIVE_CHUNK_SIZE];
        while !stop.load(Ordering::SeqCst) {
            let read = {
                let mut transport = self.transport.lock().unwrap();
                match transport.as_mut() {
                    Some(t) => t.read_available(&mut chunk),
                    None => break,
                }
            };
            match read {
                Ok(0) => {}
                Ok(n) => self.on_bytes_received(&chunk[..n]),
                Err(e) => {
                    warn!("port {} read failed: {e}", self.path);
                    self.on_fatal_read_error(e);
                    break;
                }
            }
            self.check_request_timeout();
        }
    }

    fn on_bytes_received(self: &Arc<Self>, data: &[u8]) {
        self.buffer.lock().unwrap().append(data);
        let bytes = Bytes::copy_from_slice(data);
        // Byte event first, then packet events, per spec.md §5 ordering.
        self.dispatch(move |d, p| d.did_receive_data(p, &bytes));

        let matches = {
            let mut buffer = self.buffer.lock().unwrap();
            self.matcher.lock().unwrap().scan(&mut buffer)
        };
        for packet_match in matches {
            let descriptor = packet_match.descriptor.clone();
            let bytes = packet_match.bytes.clone();
            self.dispatch(move |d, p| d.did_receive_packet(p, &bytes, &descriptor));
        }

        self.poll_request_queue();
    }

    fn poll_request_queue(self: &Arc<Self>) {
        let event = {
            let mut buffer = self.buffer.lock().unwrap();
            self.request_queue.lock().unwrap().on_buffer_changed(&mut buffer)
        };
        if let Some(QueueEvent::ResponseReceived { request, response, .. }) = event {
            self.dispatch(move |d, p| d.did_receive_response(p, &response, &request));
            self.advance_queue();
        }
    }

    fn check_request_timeout(self: &Arc<Self>) {
        let event = self.request_queue.lock().unwrap().check_timeout(Instant::now());
        if let Some(QueueEvent::TimedOut { request }) = event {
            self.dispatch(move |d, p| d.request_did_timeout(p, &request));
            self.advance_queue();
        }
    }

    fn advance_queue(self: &Arc<Self>) {
        let next = self.request_queue.lock().unwrap().advance();
        if let Some(next) = next {
            self.write_request(next);
        }
    }

    fn on_fatal_read_error(self: &Arc<Self>, error: Error) {
        *self.state.lock().unwrap() = PortState::Removed;
        self.fail_all_requests();
        self.dispatch_error_owned(error);
        self.dispatch(|d, p| d.was_removed_from_system(p));
    }

    /// Transitions straight to `Removed` because the
    /// [`PortManager`](crate::manager::PortManager) no longer sees this
    /// device in its enumeration, independent of whatever the receive loop
    /// observes. A no-op if the port is already removed.
    pub(crate) fn mark_removed_by_manager(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == PortState::Removed {
                return;
            }
            *state = PortState::Removed;
        }
        self.stop_receive_loop();
        self.transport.lock().unwrap().take();
        self.fail_all_requests();
        self.dispatch(|d, p| d.was_removed_from_system(p));
    }

    fn fail_all_requests(self: &Arc<Self>) {
        let failed = self.request_queue.lock().unwrap().drain_all();
        for _ in failed {
            // spec.md §4.6: every queued and in-flight request fails with
            // `portClosed`; the delegate has no per-request error hook, so
            // this is surfaced only through the general error channel.
            self.dispatch_error(Error::PortClosed);
        }
    }

    fn dispatch(self: &Arc<Self>, f: impl FnOnce(&Arc<dyn SerialPortDelegate>, &Arc<Port>) + Send + 'static) {
        let delegate_weak = self.delegate.lock().unwrap().clone();
        let port = self.clone();
        executor::post(move || {
            if let Some(weak) = delegate_weak {
                if let Some(delegate) = weak.upgrade() {
                    f(&delegate, &port);
                }
            }
        });
    }

    fn dispatch_error(self: &Arc<Self>, error: Error) {
        self.dispatch_error_owned(error);
    }

    fn dispatch_error_owned(self: &Arc<Self>, error: Error) {
        let error = Arc::new(error);
        self.dispatch(move |d, p| d.did_encounter_error(p, &error));
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PacketDescriptor;
    use crate::transport::mock::MockTransport;
    use crate::user_info::UserInfo;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::Duration;

    enum Event {
        Data(Bytes),
        Packet(Bytes, PacketDescriptor),
        Response(Bytes, Request),
        Timeout(Request),
        Removed,
        Opened,
        Closed,
        Error(String),
    }

    struct TestDelegate {
        tx: Sender<Event>,
    }

    impl SerialPortDelegate for TestDelegate {
        fn did_receive_data(&self, _port: &Arc<Port>, data: &Bytes) {
            let _ = self.tx.send(Event::Data(data.clone()));
        }

        fn was_removed_from_system(&self, _port: &Arc<Port>) {
            let _ = self.tx.send(Event::Removed);
        }

        fn did_receive_packet(&self, _port: &Arc<Port>, packet: &Bytes, descriptor: &PacketDescriptor) {
            let _ = self.tx.send(Event::Packet(packet.clone(), descriptor.clone()));
        }

        fn did_receive_response(&self, _port: &Arc<Port>, response: &Bytes, request: &Request) {
            let _ = self.tx.send(Event::Response(response.clone(), request.clone()));
        }

        fn request_did_timeout(&self, _port: &Arc<Port>, request: &Request) {
            let _ = self.tx.send(Event::Timeout(request.clone()));
        }

        fn did_encounter_error(&self, _port: &Arc<Port>, error: &Error) {
            let _ = self.tx.send(Event::Error(error.to_string()));
        }

        fn was_opened(&self, _port: &Arc<Port>) {
            let _ = self.tx.send(Event::Opened);
        }

        fn was_closed(&self, _port: &Arc<Port>) {
            let _ = self.tx.send(Event::Closed);
        }
    }

    fn mock_port() -> (Arc<Port>, MockTransport, Arc<dyn SerialPortDelegate>, Receiver<Event>) {
        let transport = MockTransport::new();
        let port = Port::open_with_transport("/dev/mock0", PortConfiguration::default(), Box::new(transport.clone()));
        let (tx, rx) = channel();
        let delegate: Arc<dyn SerialPortDelegate> = Arc::new(TestDelegate { tx });
        port.set_delegate(&delegate);
        (port, transport, delegate, rx)
    }

    fn recv(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(2)).expect("expected an event before the timeout")
    }

    #[test]
    fn scenario_a_byte_then_packet_events_across_chunks() {
        let (port, transport, _delegate, rx) = mock_port();
        port.add_packet_descriptor(PacketDescriptor::with_prefix_suffix("", "\n", UserInfo::none()));

        transport.push_inbound(b"PO");
        match recv(&rx) {
            Event::Data(data) => assert_eq!(&data[..], b"PO"),
            _ => panic!("expected a data event for the first chunk"),
        }

        transport.push_inbound(b"NG\n");
        match recv(&rx) {
            Event::Data(data) => assert_eq!(&data[..], b"NG\n"),
            _ => panic!("expected a data event for the second chunk"),
        }
        // Byte events are dispatched before packet events for the same
        // chunk, but the first chunk carried no complete packet, so the
        // very next delegate call must be the packet completed by the
        // second chunk.
        match recv(&rx) {
            Event::Packet(bytes, _) => assert_eq!(&bytes[..], b"PONG\n"),
            Event::Error(e) => panic!("unexpected error: {e}"),
            _ => panic!("expected the packet event to follow the second data event"),
        }

        port.close().unwrap();
    }

    #[test]
    fn send_request_writes_bytes_and_matches_response() {
        let (port, transport, _delegate, rx) = mock_port();
        let request = Request::new(
            &b"GET_T"[..],
            UserInfo::none(),
            5.0,
            Some(Arc::new(|data: &[u8]| data.len() > 1 && data.ends_with(b"\r") && data[..data.len() - 1].iter().all(u8::is_ascii_digit))),
        );
        assert!(port.send_request(request));
        assert_eq!(transport.written(), b"GET_T".to_vec());

        transport.push_inbound(b"23\r");
        let _data_event = recv(&rx);
        match recv(&rx) {
            Event::Response(response, _) => assert_eq!(&response[..], b"23\r"),
            _ => panic!("expected a response event"),
        }
        port.close().unwrap();
    }

    #[test]
    fn send_request_on_closed_port_is_rejected_not_queued() {
        let port = Port::unopened("/dev/mock0");
        let (tx, rx) = channel();
        let delegate: Arc<dyn SerialPortDelegate> = Arc::new(TestDelegate { tx });
        port.set_delegate(&delegate);

        let rejected = Request::new(&b"STALE"[..], UserInfo::none(), -1.0, None);
        assert!(!port.send_request(rejected));
        match recv(&rx) {
            Event::Error(_) => {}
            _ => panic!("expected a PortClosed error"),
        }

        // Open for real and confirm the rejected request never resurfaces:
        // only a request sent after opening should ever reach the wire.
        let transport = MockTransport::new();
        *port.transport.lock().unwrap() = Some(Box::new(transport.clone()));
        *port.state.lock().unwrap() = PortState::Open;
        port.spawn_receive_loop();

        let live = Request::new(&b"LIVE"[..], UserInfo::none(), -1.0, None);
        assert!(port.send_request(live));
        assert_eq!(transport.written(), b"LIVE".to_vec());

        port.close().unwrap();
    }

    #[test]
    fn write_failure_reports_the_failed_request_and_advances_queue() {
        let (port, transport, _delegate, rx) = mock_port();
        transport.fail_next_write();

        let failing = Request::new(&b"FAIL"[..], UserInfo::none(), -1.0, None);
        assert!(port.send_request(failing));
        match recv(&rx) {
            Event::Error(_) => {}
            _ => panic!("expected a write-failed error for the first request"),
        }
        // A single failed write must not take the port down.
        assert_eq!(port.state(), PortState::Open);

        let next = Request::new(&b"NEXT"[..], UserInfo::none(), -1.0, None);
        assert!(port.send_request(next));
        assert_eq!(transport.written(), b"NEXT".to_vec());

        port.close().unwrap();
    }

    #[test]
    fn scenario_d_manager_style_removal_fails_in_flight_request() {
        let (port, transport, _delegate, rx) = mock_port();
        let request = Request::new(&b"GET_T"[..], UserInfo::none(), -1.0, Some(Arc::new(|_: &[u8]| false)));
        assert!(port.send_request(request));

        transport.simulate_removal();
        loop {
            match recv(&rx) {
                Event::Removed => break,
                Event::Error(_) => continue,
                _ => panic!("expected only error events to precede removal"),
            }
        }
        assert_eq!(port.state(), PortState::Removed);
    }

    #[test]
    fn close_drains_receive_loop_and_reports_closed() {
        let (port, _transport, _delegate, rx) = mock_port();
        port.close().unwrap();
        match recv(&rx) {
            Event::Closed => {}
            _ => panic!("expected a closed event"),
        }
        assert_eq!(port.state(), PortState::Closed);
    }
}
