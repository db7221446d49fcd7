//! Native stack enumeration for root marking.
//!
//! The collector asks a [`StackWalker`] to report every live stack slot of
//! every mutator thread. Runtimes with their own frame enumeration install a
//! walker of their own; [`NativeStackWalker`] spills the current thread's
//! registers and scans its stack conservatively.

use crate::visitor::GcVisitor;

/// Reports stack roots during the mark phase.
pub trait StackWalker {
    /// Report every stack slot of every quiesced mutator thread.
    fn visit_all_stacks(&mut self, visitor: &mut GcVisitor<'_>);
}

impl<F> StackWalker for F
where
    F: FnMut(&mut GcVisitor<'_>),
{
    fn visit_all_stacks(&mut self, visitor: &mut GcVisitor<'_>) {
        self(visitor);
    }
}

/// Conservative scan of the calling thread's registers and stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeStackWalker;

impl StackWalker for NativeStackWalker {
    fn visit_all_stacks(&mut self, visitor: &mut GcVisitor<'_>) {
        // SAFETY: only the current thread's own stack is read.
        unsafe { spill_registers_and_scan(|word| visitor.visit_potential(word)) };
    }
}

/// Bounds of a thread's stack.
#[derive(Debug, Clone, Copy)]
pub struct StackBounds {
    /// The bottom of the stack (highest address).
    pub bottom: usize,
    /// The top of the stack (lowest address).
    pub top: usize,
}

/// Stack bounds of the current thread.
#[cfg(all(target_os = "linux", not(miri)))]
#[must_use]
pub fn get_stack_bounds() -> Option<StackBounds> {
    use libc::{
        pthread_attr_destroy, pthread_attr_getstack, pthread_attr_t, pthread_getattr_np,
        pthread_self,
    };

    unsafe {
        let mut attr: pthread_attr_t = std::mem::zeroed();
        if pthread_getattr_np(pthread_self(), &raw mut attr) != 0 {
            return None;
        }

        let mut stackaddr: *mut libc::c_void = std::ptr::null_mut();
        let mut stacksize: libc::size_t = 0;
        let ret = pthread_attr_getstack(&raw const attr, &raw mut stackaddr, &raw mut stacksize);
        pthread_attr_destroy(&raw mut attr);
        if ret != 0 {
            return None;
        }

        Some(StackBounds {
            bottom: stackaddr as usize + stacksize,
            top: stackaddr as usize,
        })
    }
}

/// Stack bounds of the current thread. Unknown on this platform, so only
/// spilled registers are scanned.
#[cfg(any(not(target_os = "linux"), miri))]
#[must_use]
pub fn get_stack_bounds() -> Option<StackBounds> {
    None
}

/// Spill callee-saved registers onto the stack, then feed every register and
/// every stack word from the current frame to the stack bottom to `scan_fn`.
///
/// # Safety
///
/// Reads raw stack memory of the calling thread.
#[inline(never)]
pub unsafe fn spill_registers_and_scan<F>(mut scan_fn: F)
where
    F: FnMut(usize),
{
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    let mut regs = [0usize; 6];
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    unsafe {
        std::arch::asm!(
            "mov {0}, rbx",
            "mov {1}, rbp",
            "mov {2}, r12",
            "mov {3}, r13",
            "mov {4}, r14",
            "mov {5}, r15",
            out(reg) regs[0],
            out(reg) regs[1],
            out(reg) regs[2],
            out(reg) regs[3],
            out(reg) regs[4],
            out(reg) regs[5],
        );
    }
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    std::hint::black_box(&regs);

    #[cfg(any(not(target_arch = "x86_64"), miri))]
    let regs = [0usize; 32];
    #[cfg(any(not(target_arch = "x86_64"), miri))]
    std::hint::black_box(&regs);

    for r in &regs {
        scan_fn(*r);
    }

    let Some(bounds) = get_stack_bounds() else {
        return;
    };

    // The stack grows down; a local's address approximates the stack pointer.
    let sp = std::ptr::addr_of!(scan_fn) as usize;
    let mut current = sp & !(std::mem::align_of::<usize>() - 1);
    debug_assert!(current >= bounds.top);

    while current < bounds.bottom {
        // SAFETY: [sp, bottom) is the live part of this thread's stack.
        let word = unsafe { std::ptr::read_volatile(current as *const usize) };
        scan_fn(word);
        current += std::mem::size_of::<usize>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(target_os = "linux", not(miri)))]
    fn test_bounds_contain_a_local() {
        let local = 0usize;
        let addr = std::ptr::addr_of!(local) as usize;
        let bounds = get_stack_bounds().unwrap();
        assert!(bounds.top <= addr && addr < bounds.bottom);
    }

    #[test]
    #[cfg(all(target_os = "linux", not(miri)))]
    fn test_scan_sees_a_stack_word() {
        let marker = std::hint::black_box(0x5eed_cafe_usize);
        let mut seen = false;
        unsafe {
            spill_registers_and_scan(|w| seen |= w == 0x5eed_cafe);
        }
        std::hint::black_box(&marker);
        assert!(seen);
    }
}
