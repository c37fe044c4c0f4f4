/// Large enough to hold the widest CPU context this crate walks (an x86-64
/// `CONTEXT` on Windows is 1232 bytes). Only the platform-specific stack
/// walker interprets the bytes; everyone else treats it as opaque, per the
/// "platform-native CONTEXT struct" design note.
pub const CPU_CONTEXT_SIZE: usize = 1232;

/// An opaque, arch-sized capture of a target thread's CPU register state at
/// the moment a hook fired. Only a `StackWalker` implementation for the
/// matching platform is meant to interpret the bytes.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct CpuContext {
    bytes: [u8; CPU_CONTEXT_SIZE],
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        CpuContext {
            bytes: [0; CPU_CONTEXT_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[cfg(windows)]
    pub fn as_bytes_mut_ptr(&mut self) -> *mut core::ffi::c_void {
        self.bytes.as_mut_ptr() as *mut core::ffi::c_void
    }

    /// Reads (Rip, Rbp, Rsp) out of an x86-64 Windows `CONTEXT` by the fixed
    /// offsets `winnt.h` defines for that struct. 32-bit targets are not
    /// supported by this walker; `StackWalker` callers are expected to
    /// build for the target's own architecture.
    #[cfg(windows)]
    pub fn native_pc_frame_stack(&self) -> (u64, u64, u64) {
        const RIP_OFFSET: usize = 0xF8;
        const RSP_OFFSET: usize = 0x98;
        const RBP_OFFSET: usize = 0xA0;
        let read_u64 = |offset: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.bytes[offset..offset + 8]);
            u64::from_le_bytes(buf)
        };
        (read_u64(RIP_OFFSET), read_u64(RBP_OFFSET), read_u64(RSP_OFFSET))
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A handle to the target process, opened with whatever rights the platform
/// stack walker and symbolizer need (read memory, query instructions).
pub struct TargetHandle {
    pid: u32,
    #[cfg(windows)]
    process: windows::Win32::Foundation::HANDLE,
}

impl TargetHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(windows)]
    pub fn open(pid: u32) -> Result<Self, crate::SymbolError> {
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
        };
        let process = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid) }
            .map_err(|_| crate::SymbolError::CouldNotOpenTarget)?;
        Ok(TargetHandle { pid, process })
    }

    #[cfg(windows)]
    pub fn raw_handle(&self) -> windows::Win32::Foundation::HANDLE {
        self.process
    }

    #[cfg(not(windows))]
    pub fn open(pid: u32) -> Result<Self, crate::SymbolError> {
        Ok(TargetHandle { pid })
    }
}

#[cfg(windows)]
impl Drop for TargetHandle {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;
        unsafe {
            let _ = CloseHandle(self.process);
        }
    }
}
