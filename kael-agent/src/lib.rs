//! Loaded into the target process, this crate detours the heap allocator and
//! reports every call to a monitor process via the rendezvous IPC events in
//! `kael-ipc`. Exists as both a `cdylib` (loaded into an arbitrary target)
//! and an `rlib` (so its logic is unit-testable without loading a DLL).

mod controller;
mod hooks;
mod metadata;

pub use controller::PROFILING_ENABLED;
pub use metadata::{AnalyzerMetadata, InstrumentType, KAEL_METADATA};

use std::sync::Arc;

use kael_ipc::{replace_event_name, NamedEvent, EVENT_INTERRUPT, EVENT_INTERRUPT_CONTINUE, EVENT_START, EVENT_START_CONFIRM, EVENT_STOP, EVENT_STOP_CONFIRM};

/// Creates this process's three IPC events, spawns the start/stop
/// controller threads, and installs the heap detours. Returns `false` if
/// any event could not be created or the detours could not be installed —
/// in either case the caller should refuse to load rather than run
/// half-instrumented.
pub fn attach() -> bool {
    let pid = std::process::id();

    let interrupt_name = replace_event_name(EVENT_INTERRUPT, pid);
    let start_confirm_name = replace_event_name(EVENT_START_CONFIRM, pid);
    let stop_confirm_name = replace_event_name(EVENT_STOP_CONFIRM, pid);
    let interrupt_continue_name = Box::leak(replace_event_name(EVENT_INTERRUPT_CONTINUE, pid).into_boxed_str());
    let start_name = replace_event_name(EVENT_START, pid);
    let stop_name = replace_event_name(EVENT_STOP, pid);

    let Ok(interrupt) = NamedEvent::create(interrupt_name) else { return false };
    let Ok(start_confirm) = NamedEvent::create(start_confirm_name) else { return false };
    let Ok(stop_confirm) = NamedEvent::create(stop_confirm_name) else { return false };

    hooks::set_interrupt_event(interrupt);

    let start_confirm = Arc::new(start_confirm);
    let stop_confirm = Arc::new(stop_confirm);

    std::thread::spawn(move || {
        let start = NamedEvent::wait_until_opened(start_name, kael_ipc::OPEN_RETRY_INTERVAL);
        let stop = NamedEvent::wait_until_opened(stop_name, kael_ipc::OPEN_RETRY_INTERVAL);
        controller::spawn_controllers(start, start_confirm, stop, stop_confirm);
    });

    install_detours(interrupt_continue_name)
}

#[cfg(windows)]
fn install_detours(interrupt_continue_name: &'static str) -> bool {
    hooks::detours::install(interrupt_continue_name).is_ok()
}

#[cfg(not(windows))]
fn install_detours(_interrupt_continue_name: &'static str) -> bool {
    // Heap interposition is a Windows-only technique in this profiler; a
    // non-Windows build of this crate exists purely so the IPC/metadata
    // logic above stays unit-testable on the development machine.
    true
}

#[cfg(windows)]
pub fn detach() -> bool {
    hooks::detours::uninstall().is_ok()
}

#[cfg(not(windows))]
pub fn detach() -> bool {
    true
}

#[cfg(windows)]
#[no_mangle]
extern "system" fn DllMain(
    _module: windows::Win32::Foundation::HINSTANCE,
    call_reason: u32,
    _reserved: *mut core::ffi::c_void,
) -> windows::Win32::Foundation::BOOL {
    const DLL_PROCESS_ATTACH: u32 = 1;
    const DLL_PROCESS_DETACH: u32 = 0;

    match call_reason {
        DLL_PROCESS_ATTACH => windows::Win32::Foundation::BOOL::from(attach()),
        DLL_PROCESS_DETACH => windows::Win32::Foundation::BOOL::from(detach()),
        _ => windows::Win32::Foundation::BOOL(1),
    }
}
