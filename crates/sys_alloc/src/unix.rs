use std::io;
use std::ptr;
use std::sync::OnceLock;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos",
))]
const NORESERVE_FLAG: libc::c_int = libc::MAP_NORESERVE;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos",
)))]
const NORESERVE_FLAG: libc::c_int = 0;

const READ_WRITE: libc::c_int = libc::PROT_READ | libc::PROT_WRITE;

pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    })
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `mmap` an anonymous private range. A reserve-only range is `PROT_NONE`.
pub unsafe fn map(len: usize, no_reserve: bool, reserve_only: bool) -> io::Result<*mut u8> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANON;
    if no_reserve {
        flags |= NORESERVE_FLAG;
    }
    let prot = if reserve_only { libc::PROT_NONE } else { READ_WRITE };

    let addr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(addr.cast())
}

pub unsafe fn commit(addr: *mut u8, len: usize) -> io::Result<()> {
    check(unsafe { libc::mprotect(addr.cast(), len, READ_WRITE) })
}

pub unsafe fn purge(addr: *mut u8, len: usize) -> io::Result<()> {
    check(unsafe { libc::madvise(addr.cast(), len, libc::MADV_DONTNEED) })
}

pub unsafe fn unmap(addr: *mut u8, len: usize) {
    unsafe {
        libc::munmap(addr.cast(), len);
    }
}
