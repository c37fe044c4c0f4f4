use kael_agent::AnalyzerMetadata;
use kael_trace::TargetHandle;

use crate::error::{MonitorError, Result};

/// A decoded snapshot of the target's `KAEL_METADATA` slot, read across the
/// process boundary at the moment a hook signaled.
pub struct MetadataSnapshot {
    pub kind: u32,
    pub size: u64,
    pub pointer: u64,
    pub context_bytes: Vec<u8>,
}

#[cfg(windows)]
pub fn read_metadata(target: &TargetHandle, module_name: &str) -> Result<MetadataSnapshot> {
    let address = resolve_remote_symbol(target, module_name, "KAEL_METADATA")
        .ok_or(MonitorError::TargetUnavailable)?;
    let raw = read_process_memory(target, address, std::mem::size_of::<AnalyzerMetadata>())?;
    Ok(decode_metadata(&raw))
}

#[cfg(not(windows))]
pub fn read_metadata(_target: &TargetHandle, _module_name: &str) -> Result<MetadataSnapshot> {
    Err(MonitorError::TargetUnavailable)
}

fn decode_metadata(raw: &[u8]) -> MetadataSnapshot {
    let context_len = kael_trace::CPU_CONTEXT_SIZE;
    let context_bytes = raw[..context_len].to_vec();
    let rest = &raw[context_len..];
    // `kind: u32` immediately follows the 16-byte-aligned context; the
    // compiler then pads 4 bytes before `size: u64` to keep it 8-byte
    // aligned, matching AnalyzerMetadata's #[repr(C)] layout.
    let kind = u32::from_ne_bytes(rest[0..4].try_into().unwrap());
    let size = u64::from_ne_bytes(rest[8..16].try_into().unwrap());
    let pointer = u64::from_ne_bytes(rest[16..24].try_into().unwrap());
    MetadataSnapshot { kind, size, pointer, context_bytes }
}

#[cfg(windows)]
fn read_process_memory(target: &TargetHandle, address: u64, len: usize) -> Result<Vec<u8>> {
    use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
    let mut buffer = vec![0u8; len];
    let mut bytes_read = 0usize;
    unsafe {
        ReadProcessMemory(
            target.raw_handle(),
            address as *const core::ffi::c_void,
            buffer.as_mut_ptr() as *mut core::ffi::c_void,
            len,
            Some(&mut bytes_read),
        )
        .map_err(|_| MonitorError::TargetUnavailable)?;
    }
    if bytes_read != len {
        return Err(MonitorError::TargetUnavailable);
    }
    Ok(buffer)
}

/// Walks the target module's PE export directory, entirely through
/// `ReadProcessMemory`, to find the address of an exported symbol by name.
/// Mirrors `GetRemoteModuleHandle`/`GetRemoteProcAddress` from the original
/// monitor, which resolve exports without loading the module locally.
#[cfg(windows)]
fn resolve_remote_symbol(target: &TargetHandle, module_name: &str, symbol_name: &str) -> Option<u64> {
    let base = remote_module_base(target, module_name)?;
    let dos_header = read_process_memory(target, base, 0x40).ok()?;
    let e_lfanew = u32::from_le_bytes(dos_header[0x3c..0x40].try_into().ok()?) as u64;

    let nt_headers = read_process_memory(target, base + e_lfanew, 0x108).ok()?;
    // IMAGE_DATA_DIRECTORY[0] (exports) sits at a fixed offset within the
    // optional header for PE32+; this profiler only targets x86-64 targets.
    const EXPORT_DIR_RVA_OFFSET: usize = 0x88;
    let export_rva =
        u32::from_le_bytes(nt_headers[EXPORT_DIR_RVA_OFFSET..EXPORT_DIR_RVA_OFFSET + 4].try_into().ok()?);
    if export_rva == 0 {
        return None;
    }

    let export_dir = read_process_memory(target, base + export_rva as u64, 0x28).ok()?;
    let number_of_names = u32::from_le_bytes(export_dir[0x18..0x1c].try_into().ok()?);
    let address_of_functions = u32::from_le_bytes(export_dir[0x1c..0x20].try_into().ok()?);
    let address_of_names = u32::from_le_bytes(export_dir[0x20..0x24].try_into().ok()?);
    let address_of_name_ordinals = u32::from_le_bytes(export_dir[0x24..0x28].try_into().ok()?);

    for i in 0..number_of_names {
        let name_rva_bytes =
            read_process_memory(target, base + address_of_names as u64 + i as u64 * 4, 4).ok()?;
        let name_rva = u32::from_le_bytes(name_rva_bytes.try_into().ok()?);
        let name_bytes = read_process_memory(target, base + name_rva as u64, 256).ok()?;
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        if &name_bytes[..end] != symbol_name.as_bytes() {
            continue;
        }

        let ordinal_bytes =
            read_process_memory(target, base + address_of_name_ordinals as u64 + i as u64 * 2, 2).ok()?;
        let ordinal = u16::from_le_bytes(ordinal_bytes.try_into().ok()?);

        let function_rva_bytes = read_process_memory(
            target,
            base + address_of_functions as u64 + ordinal as u64 * 4,
            4,
        )
        .ok()?;
        let function_rva = u32::from_le_bytes(function_rva_bytes.try_into().ok()?);
        return Some(base + function_rva as u64);
    }

    None
}

#[cfg(windows)]
fn remote_module_base(target: &TargetHandle, module_name: &str) -> Option<u64> {
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    };

    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE, target.pid()) }.ok()?;
    let mut entry = MODULEENTRY32W { dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32, ..Default::default() };

    let mut found = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
    while found {
        let name_end = entry.szModule.iter().position(|&c| c == 0).unwrap_or(entry.szModule.len());
        let name = String::from_utf16_lossy(&entry.szModule[..name_end]);
        if name.eq_ignore_ascii_case(module_name) {
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(snapshot);
            }
            return Some(entry.modBaseAddr as u64);
        }
        found = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
    }

    unsafe {
        let _ = windows::Win32::Foundation::CloseHandle(snapshot);
    }
    None
}
