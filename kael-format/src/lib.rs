//! Binary object model and event-log stream shared by the target-side agent,
//! the monitor, and the offline converter.
//!
//! Encoding is little-endian and packed: no implicit padding between fields,
//! and any field typed "platform word" is encoded at the *writer's* pointer
//! width, which is why every log starts with an architecture-tagged header.

mod arch;
mod codec;
mod error;
mod objects;
mod stream;

pub use arch::Arch;
pub use codec::{
    parse_allocation, parse_deallocation, parse_header, parse_object, parse_session,
    parse_stacktrace, serialize_allocation, serialize_deallocation, serialize_header,
    serialize_session, serialize_stacktrace, skip_object,
};
pub use error::{FormatError, Result};
pub use objects::{
    Allocation, Deallocation, Header, LogRecord, ObjectKind, ObjectPrefix, Session, Stacktrace,
    SymbolEntry, CURRENT_VERSION, MAGIC, MAX_STACK_FRAMES,
};
pub use stream::{EventLogReader, EventLogWriter};
