use kael_format::SymbolEntry;

use crate::error::SymbolError;

/// Hook function names that must never appear in a recorded trace: the
/// instrumentation thunks themselves, always the innermost frames of any
/// walk that starts inside a hook.
const FILTERED_FRAME_NAMES: [&str; 2] = ["uberHeapAlloc", "uberHeapFree"];

/// Resolves raw instruction pointers into symbol names and, best-effort,
/// source file/line. A trace that resolves to nothing usable (only hook
/// frames, or a pointer with no symbol) is still recorded — as an empty
/// trace, per the allocation/stacktrace relationship in the wire format.
pub trait Symbolizer {
    fn init(&mut self, target: &crate::context::TargetHandle) -> Result<(), SymbolError>;
    fn symbolize(&self, frames: &[u64]) -> Vec<SymbolEntry>;
}

fn is_hook_frame(name: &str) -> bool {
    FILTERED_FRAME_NAMES.iter().any(|hook| *hook == name)
}

/// Drops hook-function frames and frames with no resolvable name, keeping
/// the order of everything else. Shared by every platform implementation so
/// the filtering rule lives in exactly one place.
fn filter_resolved(entries: Vec<SymbolEntry>) -> Vec<SymbolEntry> {
    entries
        .into_iter()
        .filter(|e| !e.name.is_empty() && !is_hook_frame(&e.name))
        .collect()
}

#[cfg(windows)]
pub use windows_symbolizer::DbgHelpSymbolizer;

#[cfg(windows)]
mod windows_symbolizer {
    use super::*;
    use std::ffi::c_void;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Diagnostics::Debug::{
        SymGetLineFromAddr64, SymGetSymFromAddr64, SymInitialize, IMAGEHLP_LINE64, SYMBOL_INFO,
        SYM_INIT_OPTIONS, SYMOPT_DEFERRED_LOADS,
    };

    /// Wraps DbgHelp's symbol engine. `SymInitialize` is process-wide and
    /// must run exactly once per target; subsequent `symbolize` calls reuse
    /// the loaded module list DbgHelp builds lazily via
    /// `SYMOPT_DEFERRED_LOADS`.
    pub struct DbgHelpSymbolizer {
        process: Option<HANDLE>,
    }

    impl DbgHelpSymbolizer {
        pub fn new() -> Self {
            DbgHelpSymbolizer { process: None }
        }
    }

    impl Default for DbgHelpSymbolizer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Symbolizer for DbgHelpSymbolizer {
        fn init(&mut self, target: &crate::context::TargetHandle) -> Result<(), SymbolError> {
            let process = target.raw_handle();
            unsafe {
                windows::Win32::System::Diagnostics::Debug::SymSetOptions(SYMOPT_DEFERRED_LOADS);
                SymInitialize(process, None, true)
                    .map_err(|_| SymbolError::InitFailed(target.pid()))?;
            }
            self.process = Some(process);
            Ok(())
        }

        fn symbolize(&self, frames: &[u64]) -> Vec<SymbolEntry> {
            // Degrade to an empty trace rather than panicking: a target
            // whose symbol engine never initialized successfully still has
            // its allocations recorded, just without resolved frames.
            let Some(process) = self.process else {
                return Vec::new();
            };

            let mut resolved = Vec::with_capacity(frames.len());
            for &pc in frames {
                let name = resolve_name(process, pc);
                let (file, line) = resolve_line(process, pc);
                resolved.push(SymbolEntry { name, file, line });
            }
            filter_resolved(resolved)
        }
    }

    fn resolve_name(process: HANDLE, pc: u64) -> String {
        const MAX_NAME: usize = 256;
        let mut buf = vec![0u8; std::mem::size_of::<SYMBOL_INFO>() + MAX_NAME];
        let info = buf.as_mut_ptr() as *mut SYMBOL_INFO;
        unsafe {
            (*info).SizeOfStruct = std::mem::size_of::<SYMBOL_INFO>() as u32;
            (*info).MaxNameLen = MAX_NAME as u32;
            let mut displacement: u64 = 0;
            let ok = SymGetSymFromAddr64(process, pc, Some(&mut displacement), info);
            if ok.is_err() {
                return String::new();
            }
            let name_ptr = (*info).Name.as_ptr() as *const u8;
            let name_len = (*info).NameLen as usize;
            let slice = std::slice::from_raw_parts(name_ptr, name_len.min(MAX_NAME));
            String::from_utf8_lossy(slice).into_owned()
        }
    }

    fn resolve_line(process: HANDLE, pc: u64) -> (String, u64) {
        let mut line = IMAGEHLP_LINE64::default();
        line.SizeOfStruct = std::mem::size_of::<IMAGEHLP_LINE64>() as u32;
        let mut displacement: u32 = 0;
        unsafe {
            if SymGetLineFromAddr64(process, pc, &mut displacement, &mut line).is_err() {
                return (String::new(), 0);
            }
            if line.FileName.0.is_null() {
                return (String::new(), 0);
            }
            let file = line.FileName.to_string().unwrap_or_default();
            (file, line.LineNumber as u64)
        }
    }
}

#[cfg(not(windows))]
pub struct NullSymbolizer;

#[cfg(not(windows))]
impl NullSymbolizer {
    pub fn new() -> Self {
        NullSymbolizer
    }
}

#[cfg(not(windows))]
impl Default for NullSymbolizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(windows))]
impl Symbolizer for NullSymbolizer {
    fn init(&mut self, _target: &crate::context::TargetHandle) -> Result<(), SymbolError> {
        Ok(())
    }

    fn symbolize(&self, _frames: &[u64]) -> Vec<SymbolEntry> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_hook_frames_and_unresolved_names() {
        let resolved = vec![
            SymbolEntry { name: "uberHeapAlloc".to_string(), file: String::new(), line: 0 },
            SymbolEntry { name: String::new(), file: String::new(), line: 0 },
            SymbolEntry { name: "main".to_string(), file: "main.c".to_string(), line: 5 },
        ];
        let filtered = filter_resolved(resolved);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "main");
    }

    #[test]
    fn trace_that_is_entirely_hook_frames_becomes_empty() {
        let resolved = vec![
            SymbolEntry { name: "uberHeapAlloc".to_string(), file: String::new(), line: 0 },
            SymbolEntry { name: "uberHeapFree".to_string(), file: String::new(), line: 0 },
        ];
        assert!(filter_resolved(resolved).is_empty());
    }
}
