// Enumerates serial devices and emits connect/disconnect events as the
// OS's device registry changes (spec.md §4.7).
//
// The original `ORSSerialPortManager` is a `+sharedSerialPortManager`
// singleton reconciling against IOKit add/remove notifications delivered on
// the main run loop. This crate has no run loop, so hotplug detection is
// enumeration-diff based: a dedicated background thread re-enumerates on a
// fixed interval and reconciles the result against the previous snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::delegate::PortManagerDelegate;
use crate::executor;
use crate::port::Port;
use crate::transport;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

struct PollLoop {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Process-wide view of the serial devices currently visible to the OS.
///
/// Most applications reach this through [`PortManager::shared`], the Rust
/// analogue of `+[ORSSerialPortManager sharedSerialPortManager]`; an
/// application that wants to own the instance's lifetime directly (e.g. to
/// stop polling deterministically) can use [`PortManager::new`] instead —
/// both share the same implementation.
pub struct PortManager {
    ports: Mutex<HashMap<String, Arc<Port>>>,
    delegate: Mutex<Option<Weak<dyn PortManagerDelegate>>>,
    poll: Mutex<Option<PollLoop>>,
    poll_interval: Duration,
}

impl PortManager {
    /// Builds a manager, takes an initial enumeration snapshot (no events
    /// fire for devices already present), and starts its background
    /// hotplug-poll thread.
    pub fn new() -> Arc<Self> {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Like [`PortManager::new`] with a caller-chosen poll interval.
    pub fn with_poll_interval(poll_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            ports: Mutex::new(HashMap::new()),
            delegate: Mutex::new(None),
            poll: Mutex::new(None),
            poll_interval,
        });
        manager.take_initial_snapshot();
        manager.clone().spawn_poll_loop();
        manager
    }

    /// Lazily-initialized, process-wide shared instance.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<PortManager>> = OnceLock::new();
        SHARED.get_or_init(Self::new).clone()
    }

    pub fn set_delegate(&self, delegate: &Arc<dyn PortManagerDelegate>) {
        *self.delegate.lock().unwrap() = Some(Arc::downgrade(delegate));
    }

    /// The ports currently believed to be present. Between event
    /// notifications this equals the post-event set, per spec.md §3's
    /// `availablePorts` invariant.
    pub fn available_ports(&self) -> Vec<Arc<Port>> {
        self.ports.lock().unwrap().values().cloned().collect()
    }

    /// Forces an immediate reconciliation instead of waiting for the next
    /// poll tick. Mainly useful for tests and for applications that want to
    /// react to an external hint (e.g. a udev event) without waiting for
    /// the interval to elapse.
    pub fn refresh(&self) {
        self.reconcile();
    }

    /// Stops the background poll loop. Existing `Port` handles remain valid
    /// references; no further connect/disconnect events will be emitted
    /// until a new manager (or `refresh`) is used.
    pub fn stop_watching(&self) {
        if let Some(mut poll) = self.poll.lock().unwrap().take() {
            poll.stop.store(true, Ordering::SeqCst);
            if let Some(join) = poll.join.take() {
                let _ = join.join();
            }
        }
    }

    fn take_initial_snapshot(&self) {
        let seen = match transport::available_ports() {
            Ok(seen) => seen,
            Err(e) => {
                warn!("initial serial device enumeration failed: {e}");
                return;
            }
        };
        let mut ports = self.ports.lock().unwrap();
        for path in seen {
            ports.entry(path.clone()).or_insert_with(|| Port::unopened(path));
        }
    }

    fn spawn_poll_loop(self: Arc<Self>) {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let manager = self.clone();
        let interval = self.poll_interval;
        let join = thread::Builder::new()
            .name("serialcraft-hotplug".into())
            .spawn(move || {
                const STEP: Duration = Duration::from_millis(50);
                while !stop_clone.load(Ordering::SeqCst) {
                    let mut waited = Duration::ZERO;
                    while waited < interval {
                        if stop_clone.load(Ordering::SeqCst) {
                            return;
                        }
                        let step = STEP.min(interval - waited);
                        thread::sleep(step);
                        waited += step;
                    }
                    manager.reconcile();
                }
            })
            .expect("failed to spawn hotplug polling thread");
        *self.poll.lock().unwrap() = Some(PollLoop { stop, join: Some(join) });
    }

    /// Re-enumerates the OS device registry and diffs it against the
    /// current snapshot, emitting `ports_connected`/`ports_disconnected`
    /// exactly once per call with a non-empty delta, per spec.md §4.7.
    fn reconcile(&self) {
        let seen = match transport::available_ports() {
            Ok(seen) => seen,
            Err(e) => {
                warn!("serial device enumeration failed: {e}");
                return;
            }
        };
        self.reconcile_against(seen);
    }

    /// The diffing half of `reconcile`, taking the enumeration result
    /// directly so it can be exercised without a real OS device registry.
    fn reconcile_against(&self, seen: Vec<String>) {
        let mut ports = self.ports.lock().unwrap();
        let mut added = Vec::new();
        for path in &seen {
            if !ports.contains_key(path) {
                let port = Port::unopened(path.clone());
                ports.insert(path.clone(), port.clone());
                added.push(port);
            }
        }

        let mut removed = Vec::new();
        ports.retain(|path, port| {
            if seen.contains(path) {
                true
            } else {
                port.mark_removed_by_manager();
                removed.push(port.clone());
                false
            }
        });
        drop(ports);

        if !added.is_empty() {
            debug!(
                "ports connected: {:?}",
                added.iter().map(|p| p.path().to_owned()).collect::<Vec<_>>()
            );
            self.dispatch(move |d| d.ports_connected(&added));
        }
        if !removed.is_empty() {
            debug!(
                "ports disconnected: {:?}",
                removed.iter().map(|p| p.path().to_owned()).collect::<Vec<_>>()
            );
            self.dispatch(move |d| d.ports_disconnected(&removed));
        }
    }

    fn dispatch(&self, f: impl FnOnce(&Arc<dyn PortManagerDelegate>) + Send + 'static) {
        let delegate_weak = self.delegate.lock().unwrap().clone();
        executor::post(move || {
            if let Some(weak) = delegate_weak {
                if let Some(delegate) = weak.upgrade() {
                    f(&delegate);
                }
            }
        });
    }
}

impl Drop for PortManager {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for PortManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortManager")
            .field("available_ports", &self.ports.lock().unwrap().len())
            .finish()
    }
}
