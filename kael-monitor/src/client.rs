use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kael_ipc::MonitorEvents;
use kael_trace::{CpuContext, StackWalker, TargetHandle};

use crate::backend::QueuedBackend;
use crate::error::Result;
use crate::target_memory::{self, MetadataSnapshot};

const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const DRAIN_RETRY_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

const INSTRUMENT_ALLOCATION: u32 = 1;
const INSTRUMENT_DEALLOCATION: u32 = 2;

/// Drives the rendezvous protocol against a single target process: waits
/// for its interrupt signal, reads its metadata, walks its stack, hands the
/// event to the backend, and resumes it. Runs until the target exits or the
/// caller requests a stop.
pub struct MonitorClient<W: StackWalker> {
    pid: u32,
    events: MonitorEvents,
    target: TargetHandle,
    walker: W,
    module_name: String,
    backend: Arc<QueuedBackend>,
}

impl<W: StackWalker> MonitorClient<W> {
    pub fn attach(pid: u32, walker: W, module_name: impl Into<String>, backend: Arc<QueuedBackend>) -> Result<Self> {
        let events = MonitorEvents::bootstrap(pid)?;
        let target = TargetHandle::open(pid).map_err(|_| crate::error::MonitorError::TargetUnavailable)?;
        events.start.signal();
        let _ = events.start_confirm.wait();
        Ok(MonitorClient { pid, events, target, walker, module_name: module_name.into(), backend })
    }

    /// Runs until `should_stop` returns true or the target process exits,
    /// then performs the drain-and-confirm shutdown handshake.
    pub fn run_mainloop(&self, should_stop: impl Fn() -> bool) {
        loop {
            if self.events.interrupt.wait_timeout(Some(POLL_TIMEOUT)).unwrap_or(false) {
                self.handle_interrupt();
            } else {
                self.backend.signal_timeout();
                if !process_is_alive(self.pid) {
                    break;
                }
            }

            if should_stop() {
                break;
            }
        }

        self.shutdown();
    }

    fn handle_interrupt(&self) {
        if let Ok(snapshot) = target_memory::read_metadata(&self.target, &self.module_name) {
            self.record(snapshot);
        }
        self.events.interrupt_continue.signal();
    }

    fn record(&self, snapshot: MetadataSnapshot) {
        let timestamp = unix_epoch_seconds();
        let context = context_from_bytes(&snapshot.context_bytes);
        let frames = self.walker.capture_frames(&context, &self.target);

        match snapshot.kind {
            INSTRUMENT_ALLOCATION => {
                self.backend.push_allocation(snapshot.size, snapshot.pointer as u64, timestamp, frames);
            }
            INSTRUMENT_DEALLOCATION => {
                self.backend.push_deallocation(snapshot.pointer as u64, timestamp);
            }
            _ => {}
        }
    }

    fn shutdown(&self) {
        if !process_is_alive(self.pid) {
            return;
        }

        self.events.stop.signal();

        // A stop signal can race a pending allocation/free already blocked
        // on the interrupt-continue handshake; keep acking until the
        // target actually quiesces.
        while self.events.interrupt.wait_timeout(Some(DRAIN_RETRY_TIMEOUT)).unwrap_or(false) {
            self.events.interrupt_continue.signal();
        }

        let _ = self.events.stop_confirm.wait_timeout(Some(STOP_CONFIRM_TIMEOUT));
    }
}

fn context_from_bytes(bytes: &[u8]) -> CpuContext {
    let mut context = CpuContext::zeroed();
    context.as_bytes_mut()[..bytes.len().min(context.as_bytes().len())]
        .copy_from_slice(&bytes[..bytes.len().min(context.as_bytes().len())]);
    context
}

fn unix_epoch_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(windows)]
fn process_is_alive(pid: u32) -> bool {
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, STILL_ACTIVE,
    };
    let Ok(handle) = (unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }) else {
        return false;
    };
    let mut exit_code = 0u32;
    let alive = unsafe { GetExitCodeProcess(handle, &mut exit_code) }.is_ok() && exit_code == STILL_ACTIVE.0 as u32;
    unsafe {
        let _ = windows::Win32::Foundation::CloseHandle(handle);
    }
    alive
}

#[cfg(not(windows))]
fn process_is_alive(_pid: u32) -> bool {
    false
}
