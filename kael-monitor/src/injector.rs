use crate::error::{MonitorError, Result};

/// Loads the instrumentation agent into a target process that hasn't
/// already loaded it itself.
pub trait Injector {
    fn inject(&self, pid: u32, library_path: &str) -> Result<()>;
}

#[cfg(windows)]
pub struct RemoteThreadInjector;

#[cfg(windows)]
impl Injector for RemoteThreadInjector {
    /// `kernel32.dll` loads at the same base address in every process, so
    /// `LoadLibraryA`'s address taken from this process is valid in the
    /// target too: this is the entire trick that lets a remote thread
    /// bootstrap loading an arbitrary DLL with no code of our own running
    /// there yet.
    fn inject(&self, pid: u32, library_path: &str) -> Result<()> {
        use windows::core::{s, PCSTR};
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
        use windows::Win32::System::Memory::{
            VirtualAllocEx, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
        };
        use windows::Win32::System::Threading::{
            CreateRemoteThread, OpenProcess, PROCESS_ALL_ACCESS,
        };
        use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;

        let process = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }
            .map_err(|_| MonitorError::InjectFailed)?;

        let kernel32 = unsafe { GetModuleHandleW(windows::core::w!("kernel32.dll")) }
            .map_err(|_| MonitorError::InjectFailed)?;
        let load_library = unsafe { GetProcAddress(kernel32, s!("LoadLibraryA")) }
            .ok_or(MonitorError::InjectFailed)?;

        let mut path_bytes = library_path.as_bytes().to_vec();
        path_bytes.push(0);

        let remote_memory = unsafe {
            VirtualAllocEx(
                process,
                None,
                path_bytes.len(),
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if remote_memory.is_null() {
            unsafe {
                let _ = CloseHandle(process);
            }
            return Err(MonitorError::InjectFailed);
        }

        let written = unsafe {
            WriteProcessMemory(
                process,
                remote_memory,
                path_bytes.as_ptr() as *const core::ffi::c_void,
                path_bytes.len(),
                None,
            )
        };
        if written.is_err() {
            unsafe {
                let _ = CloseHandle(process);
            }
            return Err(MonitorError::InjectFailed);
        }

        let thread = unsafe {
            CreateRemoteThread(
                process,
                None,
                0,
                Some(std::mem::transmute::<
                    unsafe extern "system" fn(PCSTR) -> u32,
                    unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
                >(std::mem::transmute(load_library))),
                Some(remote_memory),
                0,
                None,
            )
        };

        unsafe {
            let _ = CloseHandle(process);
        }

        thread.map(|_| ()).map_err(|_| MonitorError::InjectFailed)
    }
}

#[cfg(not(windows))]
pub struct UnsupportedInjector;

#[cfg(not(windows))]
impl Injector for UnsupportedInjector {
    fn inject(&self, _pid: u32, _library_path: &str) -> Result<()> {
        Err(MonitorError::InjectFailed)
    }
}
