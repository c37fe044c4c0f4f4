use std::collections::HashSet;
use std::path::Path;

use kael_format::{Allocation, Arch, Deallocation, EventLogWriter, SymbolEntry};
use kael_trace::stacktrace_id;

use crate::backend::EventSink;
use crate::error::Result;

/// Writes resolved events to the session's `leak.dat`, writing each unique
/// stacktrace exactly once the first time it's seen, keyed by the same
/// FNV-1a id a converter recomputes independently.
pub struct FilesystemSink {
    writer: EventLogWriter,
    known_stacktraces: HashSet<u32>,
}

impl FilesystemSink {
    pub fn create(path: &Path, arch: Arch, process_id: u32, session_timestamp: u64) -> Result<Self> {
        let writer = EventLogWriter::create(path, arch, process_id, session_timestamp)?;
        Ok(FilesystemSink { writer, known_stacktraces: HashSet::new() })
    }
}

impl EventSink for FilesystemSink {
    fn write_allocation(&mut self, pointer: u64, size: u64, timestamp: u64, symbols: &[SymbolEntry]) {
        let id = stacktrace_id(symbols);
        if self.known_stacktraces.insert(id) {
            if let Err(err) = self.writer.write_stacktrace(id, symbols, timestamp) {
                log::warn!("failed to write stacktrace {id}: {err}");
            }
        }
        let allocation = Allocation { stacktrace_id: id, timestamp, pointer, size };
        if let Err(err) = self.writer.write_allocation(&allocation) {
            log::warn!("failed to write allocation at {pointer:#x}: {err}");
        }
        let _ = self.writer.flush();
    }

    fn write_deallocation(&mut self, pointer: u64, timestamp: u64) {
        let deallocation = Deallocation { timestamp, pointer };
        if let Err(err) = self.writer.write_deallocation(&deallocation) {
            log::warn!("failed to write deallocation at {pointer:#x}: {err}");
        }
        let _ = self.writer.flush();
    }
}
