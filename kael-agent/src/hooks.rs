use std::sync::atomic::Ordering;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use kael_ipc::NamedEvent;

use crate::controller::PROFILING_ENABLED;
use crate::metadata::{InstrumentType, KAEL_METADATA};

/// Serializes every hooked allocation/free across all threads in the
/// target, mirroring the original critical section: only one thread at a
/// time may be mid-instrumentation, since [`KAEL_METADATA`] is a single
/// shared slot.
pub(crate) static SYNC_SECTION: Mutex<()> = Mutex::new(());

/// The event this process signals on every instrumented call. Created once,
/// at process attach, before any hook can fire.
static INTERRUPT: OnceLock<NamedEvent> = OnceLock::new();

/// The event the monitor signals to resume this process after it has read
/// [`KAEL_METADATA`]. Opened lazily and non-allocatingly on the first hook
/// invocation, since the monitor may attach after the process has already
/// started running.
static INTERRUPT_CONTINUE: OnceLock<NamedEvent> = OnceLock::new();

pub fn set_interrupt_event(event: NamedEvent) {
    let _ = INTERRUPT.set(event);
}

/// Retries opening `interrupt_continue` until it succeeds. Spinning here
/// instead of failing fast can deadlock this process forever if the monitor
/// never starts, which mirrors the original's documented risk exactly.
fn ensure_interrupt_continue(name: &str) -> &'static NamedEvent {
    INTERRUPT_CONTINUE.get_or_init(|| loop {
        match NamedEvent::open_with_retry(name, Duration::from_millis(100), 1) {
            Ok(event) => return event,
            Err(_) => std::thread::sleep(Duration::from_millis(100)),
        }
    })
}

fn instrument(kind: InstrumentType, pointer: u64, size: u64, interrupt_continue_name: &str) {
    unsafe {
        capture_context(&mut KAEL_METADATA.context);
        KAEL_METADATA.kind = kind as u32;
        KAEL_METADATA.pointer = pointer;
        KAEL_METADATA.size = size;
    }

    if let Some(interrupt) = INTERRUPT.get() {
        interrupt.signal();
    }

    let continue_event = ensure_interrupt_continue(interrupt_continue_name);
    let _ = continue_event.wait();
}

/// Runs a heap call under the sync section, instrumenting it afterward if
/// profiling is enabled and the call succeeded. `call` performs the real
/// (un-hooked) heap operation; `outcome` extracts the pointer/size pair to
/// record, or `None` if the call failed and nothing should be recorded.
pub fn guarded_call<T>(
    interrupt_continue_name: &str,
    kind: InstrumentType,
    call: impl FnOnce() -> T,
    outcome: impl FnOnce(&T) -> Option<(u64, u64)>,
) -> T {
    let _guard = SYNC_SECTION.lock().unwrap();
    let result = call();
    if PROFILING_ENABLED.load(Ordering::SeqCst) {
        if let Some((pointer, size)) = outcome(&result) {
            instrument(kind, pointer, size, interrupt_continue_name);
        }
    }
    result
}

#[cfg(windows)]
fn capture_context(context: &mut kael_trace::CpuContext) {
    use windows::Win32::System::Diagnostics::Debug::RtlCaptureContext;
    unsafe {
        RtlCaptureContext(context.as_bytes_mut_ptr() as *mut _);
    }
}

#[cfg(not(windows))]
fn capture_context(_context: &mut kael_trace::CpuContext) {}

#[cfg(windows)]
pub mod detours {
    use std::ffi::c_void;

    use retour::static_detour;
    use windows::Win32::Foundation::HANDLE;

    use super::guarded_call;
    use crate::metadata::InstrumentType;

    static_detour! {
        static HeapAllocDetour: unsafe extern "system" fn(HANDLE, u32, usize) -> *mut c_void;
        static HeapFreeDetour: unsafe extern "system" fn(HANDLE, u32, *mut c_void) -> i32;
    }

    /// Installs the `HeapAlloc`/`HeapFree` detours. Must run once, at
    /// process attach, before any other thread can reach the real
    /// functions.
    pub fn install(interrupt_continue_name: &'static str) -> Result<(), retour::Error> {
        use windows::Win32::System::Memory::{HeapAlloc as RealHeapAlloc, HeapFree as RealHeapFree};

        unsafe {
            HeapAllocDetour.initialize(
                std::mem::transmute(RealHeapAlloc as usize),
                move |heap, flags, bytes| {
                    guarded_call(
                        interrupt_continue_name,
                        InstrumentType::Allocation,
                        || HeapAllocDetour.call(heap, flags, bytes),
                        |ptr: &*mut c_void| (!ptr.is_null()).then(|| (*ptr as u64, bytes as u64)),
                    )
                },
            )?;
            HeapAllocDetour.enable()?;

            HeapFreeDetour.initialize(
                std::mem::transmute(RealHeapFree as usize),
                move |heap, flags, mem| {
                    guarded_call(
                        interrupt_continue_name,
                        InstrumentType::Deallocation,
                        || HeapFreeDetour.call(heap, flags, mem),
                        |ok: &i32| (*ok != 0).then(|| (mem as u64, 0)),
                    )
                },
            )?;
            HeapFreeDetour.enable()?;
        }
        Ok(())
    }

    pub fn uninstall() -> Result<(), retour::Error> {
        unsafe {
            HeapAllocDetour.disable()?;
            HeapFreeDetour.disable()?;
        }
        Ok(())
    }
}
