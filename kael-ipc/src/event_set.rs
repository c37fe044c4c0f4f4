use std::time::Duration;

use crate::error::Result;
use crate::named_event::NamedEvent;
use crate::names::{
    replace_event_name, EVENT_INTERRUPT, EVENT_INTERRUPT_CONTINUE, EVENT_START,
    EVENT_START_CONFIRM, EVENT_STOP, EVENT_STOP_CONFIRM,
};

/// How often the side waiting for its counterpart to open an event retries.
pub const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// The monitor owns (creates) `interrupt_continue`, `start`, and `stop` —
/// the three events it signals — and opens the three the target creates.
/// This is the ownership split from the rendezvous protocol: each side
/// creates exactly the events it signals, and opens the events it waits on.
pub struct MonitorEvents {
    pub interrupt_continue: NamedEvent,
    pub start: NamedEvent,
    pub stop: NamedEvent,
    pub interrupt: NamedEvent,
    pub start_confirm: NamedEvent,
    pub stop_confirm: NamedEvent,
}

impl MonitorEvents {
    /// Creates this side's three events, then blocks until the target's
    /// three events appear. The target is expected to create its events
    /// lazily, on its first hook invocation, so this call can block for a
    /// while in a monitor started well before the target allocates.
    pub fn bootstrap(pid: u32) -> Result<Self> {
        let interrupt_continue =
            NamedEvent::create(replace_event_name(EVENT_INTERRUPT_CONTINUE, pid))?;
        let start = NamedEvent::create(replace_event_name(EVENT_START, pid))?;
        let stop = NamedEvent::create(replace_event_name(EVENT_STOP, pid))?;

        let interrupt =
            NamedEvent::wait_until_opened(replace_event_name(EVENT_INTERRUPT, pid), OPEN_RETRY_INTERVAL);
        let start_confirm = NamedEvent::wait_until_opened(
            replace_event_name(EVENT_START_CONFIRM, pid),
            OPEN_RETRY_INTERVAL,
        );
        let stop_confirm = NamedEvent::wait_until_opened(
            replace_event_name(EVENT_STOP_CONFIRM, pid),
            OPEN_RETRY_INTERVAL,
        );

        Ok(MonitorEvents { interrupt_continue, start, stop, interrupt, start_confirm, stop_confirm })
    }
}

/// The target (instrumented) process owns `interrupt`, `start_confirm`, and
/// `stop_confirm`, and opens the monitor's three events. The target cannot
/// block indefinitely while allocating, so opening is a bounded, retried,
/// non-fatal attempt: a target that never finds a monitor just runs
/// uninstrumented.
pub struct TargetEvents {
    pub interrupt: NamedEvent,
    pub start_confirm: NamedEvent,
    pub stop_confirm: NamedEvent,
    pub interrupt_continue: NamedEvent,
    pub start: NamedEvent,
    pub stop: NamedEvent,
}

impl TargetEvents {
    pub fn create_for_target(pid: u32) -> Result<(NamedEvent, NamedEvent, NamedEvent)> {
        let interrupt = NamedEvent::create(replace_event_name(EVENT_INTERRUPT, pid))?;
        let start_confirm = NamedEvent::create(replace_event_name(EVENT_START_CONFIRM, pid))?;
        let stop_confirm = NamedEvent::create(replace_event_name(EVENT_STOP_CONFIRM, pid))?;
        Ok((interrupt, start_confirm, stop_confirm))
    }

    /// Attempts to locate the monitor's events. Each event is looked up
    /// independently with its own retry budget, since the monitor may not
    /// have created all three yet.
    pub fn try_attach(pid: u32, retry_interval: Duration, max_attempts: u32) -> Result<Self> {
        let (interrupt, start_confirm, stop_confirm) = Self::create_for_target(pid)?;
        let interrupt_continue = NamedEvent::open_with_retry(
            replace_event_name(EVENT_INTERRUPT_CONTINUE, pid),
            retry_interval,
            max_attempts,
        )?;
        let start =
            NamedEvent::open_with_retry(replace_event_name(EVENT_START, pid), retry_interval, max_attempts)?;
        let stop =
            NamedEvent::open_with_retry(replace_event_name(EVENT_STOP, pid), retry_interval, max_attempts)?;

        Ok(TargetEvents { interrupt, start_confirm, stop_confirm, interrupt_continue, start, stop })
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn monitor_and_target_rendezvous() {
        let pid = 909_090;
        let target_thread = thread::spawn(move || {
            TargetEvents::try_attach(pid, Duration::from_millis(5), 200).unwrap()
        });
        // Give the target a head start creating its three events, then
        // bootstrap the monitor side, which waits on exactly those.
        thread::sleep(Duration::from_millis(20));
        let monitor = MonitorEvents::bootstrap(pid).unwrap();
        let target = target_thread.join().unwrap();

        monitor.start.signal();
        assert!(target.start.wait_timeout(Some(Duration::from_millis(200))).unwrap());
    }
}
