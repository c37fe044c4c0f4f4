use kael_format::MAX_STACK_FRAMES;

use crate::context::{CpuContext, TargetHandle};

/// Produces a bounded list of instruction pointers from a captured CPU
/// context, walking the target's stack across process boundaries.
pub trait StackWalker {
    fn capture_frames(&self, context: &CpuContext, target: &TargetHandle) -> Vec<u64>;
}

/// A walker that returns a fixed set of frames regardless of input, for
/// tests that don't want to depend on the platform stack-walking API.
pub struct FakeStackWalker {
    frames: Vec<u64>,
}

impl FakeStackWalker {
    pub fn new(frames: Vec<u64>) -> Self {
        FakeStackWalker { frames }
    }
}

impl StackWalker for FakeStackWalker {
    fn capture_frames(&self, _context: &CpuContext, _target: &TargetHandle) -> Vec<u64> {
        self.frames.iter().copied().take(MAX_STACK_FRAMES).collect()
    }
}

#[cfg(windows)]
pub use windows_walker::WinStackWalker;

#[cfg(windows)]
mod windows_walker {
    use super::*;
    use windows::Win32::System::Diagnostics::Debug::{
        StackWalkEx, IMAGE_FILE_MACHINE_AMD64, IMAGE_FILE_MACHINE_I386, STACKFRAME_EX,
        SYM_STKWALK_DEFAULT,
    };

    /// Walks the target's stack using the Windows debug-help stack-walking
    /// API, terminating on the first zero program counter or on the API
    /// signalling failure, capped at [`MAX_STACK_FRAMES`].
    pub struct WinStackWalker;

    impl WinStackWalker {
        pub fn new() -> Self {
            WinStackWalker
        }

        #[cfg(target_pointer_width = "64")]
        const MACHINE_TYPE: u32 = IMAGE_FILE_MACHINE_AMD64.0 as u32;
        #[cfg(target_pointer_width = "32")]
        const MACHINE_TYPE: u32 = IMAGE_FILE_MACHINE_I386.0 as u32;
    }

    impl Default for WinStackWalker {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StackWalker for WinStackWalker {
        fn capture_frames(&self, context: &CpuContext, target: &TargetHandle) -> Vec<u64> {
            let mut frame = STACKFRAME_EX::default();
            let (pc, frame_addr, stack_addr) = program_counter_and_frame(context);
            frame.AddrPC.Offset = pc;
            frame.AddrPC.Mode = windows::Win32::System::Diagnostics::Debug::AddrModeFlat;
            frame.AddrFrame.Offset = frame_addr;
            frame.AddrFrame.Mode = windows::Win32::System::Diagnostics::Debug::AddrModeFlat;
            frame.AddrStack.Offset = stack_addr;
            frame.AddrStack.Mode = windows::Win32::System::Diagnostics::Debug::AddrModeFlat;

            let mut frames = Vec::with_capacity(MAX_STACK_FRAMES);
            let process = target.raw_handle();
            // The thread handle is only used by StackWalkEx for unwind
            // heuristics on some architectures; we have no live thread
            // handle to the target's specific thread, so a sentinel is
            // passed and the context drives everything else.
            let thread = windows::Win32::Foundation::HANDLE(0xDEADBEEFC0DECAFEu64 as *mut _);

            while frames.len() < MAX_STACK_FRAMES {
                let ok = unsafe {
                    StackWalkEx(
                        Self::MACHINE_TYPE,
                        process,
                        thread,
                        &mut frame,
                        context.as_bytes_mut_ptr(),
                        None,
                        None,
                        None,
                        None,
                        SYM_STKWALK_DEFAULT,
                    )
                };
                if !ok.as_bool() {
                    break;
                }
                if frame.AddrPC.Offset == 0 {
                    break;
                }
                frames.push(frame.AddrPC.Offset);
            }
            frames
        }
    }

    fn program_counter_and_frame(context: &CpuContext) -> (u64, u64, u64) {
        // The byte layout of CONTEXT is platform-defined; this crate treats
        // it as opaque except for the three fields a stack walker needs,
        // read here via the same offsets the Windows headers define for
        // the current architecture.
        context.native_pc_frame_stack()
    }
}

#[cfg(not(windows))]
pub struct NullStackWalker;

#[cfg(not(windows))]
impl NullStackWalker {
    pub fn new() -> Self {
        NullStackWalker
    }
}

#[cfg(not(windows))]
impl Default for NullStackWalker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(windows))]
impl StackWalker for NullStackWalker {
    fn capture_frames(&self, _context: &CpuContext, _target: &TargetHandle) -> Vec<u64> {
        Vec::new()
    }
}
