use std::ffi::c_void;
use std::io;
use std::ptr;
use std::sync::OnceLock;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, MEM_RESET, PAGE_NOACCESS,
    PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        // SAFETY: GetSystemInfo only writes the struct it is handed.
        let info = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info
        };
        match info.dwPageSize as usize {
            0 => 4096,
            n => n,
        }
    })
}

fn check(addr: *mut c_void) -> io::Result<*mut u8> {
    if addr.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(addr.cast())
    }
}

/// `VirtualAlloc` a fresh range. Windows has no swap-reservation knob, so
/// `no_reserve` is ignored.
pub unsafe fn map(len: usize, _no_reserve: bool, reserve_only: bool) -> io::Result<*mut u8> {
    let (kind, protect) = if reserve_only {
        (MEM_RESERVE, PAGE_NOACCESS)
    } else {
        (MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
    };
    check(unsafe { VirtualAlloc(ptr::null(), len, kind, protect) })
}

pub unsafe fn commit(addr: *mut u8, len: usize) -> io::Result<()> {
    check(unsafe { VirtualAlloc(addr.cast::<c_void>(), len, MEM_COMMIT, PAGE_READWRITE) }).map(drop)
}

pub unsafe fn purge(addr: *mut u8, len: usize) -> io::Result<()> {
    check(unsafe { VirtualAlloc(addr.cast::<c_void>(), len, MEM_RESET, PAGE_READWRITE) }).map(drop)
}

pub unsafe fn unmap(addr: *mut u8, _len: usize) {
    // MEM_RELEASE frees the whole reservation and wants a zero size.
    unsafe {
        VirtualFree(addr.cast::<c_void>(), 0, MEM_RELEASE);
    }
}
