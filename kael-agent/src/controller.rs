use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use kael_ipc::NamedEvent;

use crate::hooks::SYNC_SECTION;

/// Gate the hook thunks consult before instrumenting a call. Toggled only
/// by the two controller threads, read on every hooked allocation.
pub static PROFILING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Spawns the two long-lived threads that wait on the monitor's `start` and
/// `stop` events and flip [`PROFILING_ENABLED`] in response, acking via
/// `start_confirm`/`stop_confirm`. The toggle is taken under the same
/// [`SYNC_SECTION`] the hooks serialize on, so a start/stop can never land
/// mid-instrumentation. These threads run for the lifetime of the process;
/// there is no join point short of process exit.
pub fn spawn_controllers(
    start: NamedEvent,
    start_confirm: Arc<NamedEvent>,
    stop: NamedEvent,
    stop_confirm: Arc<NamedEvent>,
) {
    thread::spawn(move || loop {
        if start.wait().is_err() {
            break;
        }
        {
            let _guard = SYNC_SECTION.lock().unwrap();
            PROFILING_ENABLED.store(true, Ordering::SeqCst);
        }
        start_confirm.signal();
    });

    thread::spawn(move || loop {
        if stop.wait().is_err() {
            break;
        }
        {
            let _guard = SYNC_SECTION.lock().unwrap();
            PROFILING_ENABLED.store(false, Ordering::SeqCst);
        }
        stop_confirm.signal();
    });
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_and_stop_toggle_the_gate() {
        let start = NamedEvent::create("kael-agent-test.start").unwrap();
        let start_confirm =
            Arc::new(NamedEvent::create("kael-agent-test.start-confirm").unwrap());
        let stop = NamedEvent::create("kael-agent-test.stop").unwrap();
        let stop_confirm = Arc::new(NamedEvent::create("kael-agent-test.stop-confirm").unwrap());

        let start_waiter = NamedEvent::create("kael-agent-test.start").unwrap();
        let start_confirm_reader = start_confirm.clone();
        let stop_waiter = NamedEvent::create("kael-agent-test.stop").unwrap();
        let stop_confirm_reader = stop_confirm.clone();

        spawn_controllers(start_waiter, start_confirm_reader, stop_waiter, stop_confirm_reader);

        start.signal();
        assert!(start_confirm.wait_timeout(Some(Duration::from_millis(500))).unwrap());
        assert!(PROFILING_ENABLED.load(Ordering::SeqCst));

        stop.signal();
        assert!(stop_confirm.wait_timeout(Some(Duration::from_millis(500))).unwrap());
        assert!(!PROFILING_ENABLED.load(Ordering::SeqCst));
    }
}
