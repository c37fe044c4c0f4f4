use kael_trace::CpuContext;

/// Instrumentation kind recorded alongside a captured context, read by the
/// monitor out of the target's address space.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentType {
    Invalid = 0,
    Allocation = 1,
    Deallocation = 2,
}

/// Shared IPC metadata: the target writes this in place on every
/// instrumented call, and the monitor reads it out of the target's address
/// space by module base plus the exported symbol's offset. Field order and
/// width matter — this is read across a process boundary, not passed by
/// value.
#[repr(C)]
pub struct AnalyzerMetadata {
    pub context: CpuContext,
    pub kind: u32,
    pub size: u64,
    pub pointer: u64,
}

impl AnalyzerMetadata {
    pub const fn zeroed() -> Self {
        AnalyzerMetadata { context: CpuContext::zeroed(), kind: InstrumentType::Invalid as u32, size: 0, pointer: 0 }
    }
}

/// Exported so the monitor can resolve its address via the module's export
/// table plus the base address it reads from the target process.
#[no_mangle]
pub static mut KAEL_METADATA: AnalyzerMetadata = AnalyzerMetadata::zeroed();
