// Single dedicated thread that serializes delegate callback delivery.
//
// The original delivers every delegate call on the main run loop, so two
// ports never invoke a delegate concurrently with themselves. We reproduce
// that guarantee with one worker thread shared across every Port and
// PortManager in the process: callbacks are posted as boxed closures and run
// strictly in post order.

use std::sync::mpsc::{self, Sender};
use std::sync::OnceLock;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct CallbackExecutor {
    sender: Sender<Job>,
}

impl CallbackExecutor {
    fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("serialcraft-callbacks".into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn callback executor thread");
        Self { sender }
    }

    fn post(&self, job: Job) {
        // The receiving thread only exits when every Sender (including this
        // one, held for the life of the process) is dropped, so send cannot
        // fail in practice.
        let _ = self.sender.send(job);
    }
}

static EXECUTOR: OnceLock<CallbackExecutor> = OnceLock::new();

fn executor() -> &'static CallbackExecutor {
    EXECUTOR.get_or_init(CallbackExecutor::spawn)
}

/// Schedules `job` to run on the shared callback thread. Returns
/// immediately; `job` runs after every previously posted job.
pub fn post(job: impl FnOnce() + Send + 'static) {
    executor().post(Box::new(job));
}
