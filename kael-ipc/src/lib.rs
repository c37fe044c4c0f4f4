//! Rendezvous IPC: named, auto-reset OS events used both to synchronize the
//! instrumented target process and the monitor, and as backpressure, since
//! the signaling side always waits on the other side's own event before
//! continuing.

mod error;
mod event_set;
mod named_event;
mod names;

pub use error::{IpcError, Result};
pub use event_set::{MonitorEvents, TargetEvents, OPEN_RETRY_INTERVAL};
pub use named_event::NamedEvent;
pub use names::{
    replace_event_name, EVENT_INTERRUPT, EVENT_INTERRUPT_CONTINUE, EVENT_START,
    EVENT_START_CONFIRM, EVENT_STOP, EVENT_STOP_CONFIRM,
};
