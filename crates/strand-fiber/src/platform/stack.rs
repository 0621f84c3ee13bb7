// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Guarded fiber stacks (unix).
//!
//! One anonymous mapping per stack: a `PROT_NONE` guard page at the low
//! end, then the usable region. Overflow faults instead of scribbling over
//! a neighbouring allocation.

use std::io;
use std::ptr::{self, NonNull};

/// Owned stack memory. Unmapped exactly once, on drop.
#[derive(Debug)]
pub struct Stack {
    base: NonNull<u8>,
    mapped: usize,
    guard: usize,
}

// The mapping is plain memory owned by this value; nothing else aliases it
// while the owning fiber is not running.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Map a stack with at least `size` usable bytes, rounded up to whole
    /// pages.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let mapped = size
            .max(1)
            .checked_next_multiple_of(page)
            .and_then(|usable| usable.checked_add(page));
        let Some(mapped) = mapped else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stack size {} overflows the address space", size),
            ));
        };

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(base, mapped) };
            return Err(err);
        }

        let Some(base) = NonNull::new(base.cast::<u8>()) else {
            return Err(io::Error::new(io::ErrorKind::Other, "mmap returned null"));
        };

        Ok(Self {
            base,
            mapped,
            guard: page,
        })
    }

    /// One past the highest usable byte. Page-aligned.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.mapped) }
    }

    /// Lowest usable byte (just above the guard page).
    #[cfg(test)]
    fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    /// Usable bytes, excluding the guard page.
    pub fn size(&self) -> usize {
        self.mapped - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.mapped);
        }
    }
}

fn page_size() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_pages() {
        let page = page_size();
        let stack = Stack::new(page + 1).unwrap();
        assert_eq!(stack.size(), 2 * page);
    }

    #[test]
    fn top_is_sixteen_byte_aligned() {
        let stack = Stack::new(10_000).unwrap();
        assert_eq!(stack.top() as usize % 16, 0);
        assert_eq!(stack.top() as usize - stack.bottom() as usize, stack.size());
    }

    #[test]
    fn usable_region_is_writable() {
        let stack = Stack::new(8192).unwrap();
        unsafe {
            stack.bottom().write_bytes(0xAB, stack.size());
            assert_eq!(*stack.top().sub(1), 0xAB);
            assert_eq!(*stack.bottom(), 0xAB);
        }
    }

    #[test]
    fn absurd_size_is_rejected() {
        let err = Stack::new(usize::MAX - 3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
