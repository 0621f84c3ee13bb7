// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Platform back-ends for context creation and switching.
//!
//! Everything architecture- or OS-specific sits behind [`Platform`]. One
//! module per target:
//! - `x86_64`:  System V register file, `global_asm!` switch (Linux, BSD, macOS)
//! - `aarch64`: AAPCS64 register file, `global_asm!` switch (Linux, macOS)
//! - `windows`: native fibers (`CreateFiberEx` / `SwitchToFiber`)
//!
//! The rest of the crate only ever names [`Native`].

use std::ffi::c_void;
use std::io;

#[cfg(all(unix, target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(unix, target_arch = "x86_64"))]
pub use self::x86_64::{Context, SysV as Native};

#[cfg(all(unix, target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(unix, target_arch = "aarch64"))]
pub use self::aarch64::{Aapcs64 as Native, Context};

#[cfg(unix)]
mod stack;
#[cfg(unix)]
pub use self::stack::Stack;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::{Context, Stack, WinFiber as Native};

#[cfg(not(any(
    windows,
    all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))
)))]
compile_error!("strand-fiber supports x86_64/aarch64 unix targets and Windows only");

/// Name of the back-end compiled for this target.
pub const BACKEND: &str = <Native as Platform>::NAME;

/// First function executed on a fresh context. Receives the `arg` given to
/// [`Platform::create_context`] and must never return.
pub type EntryFn = unsafe extern "C" fn(arg: *mut c_void) -> !;

/// Narrow interface every back-end implements.
///
/// # Safety
///
/// Implementors must save every callee-saved register of the running
/// context in `switch_context` and restore all of them (stack pointer
/// included) from the target before transferring control.
pub unsafe trait Platform {
    /// Short back-end name for diagnostics.
    const NAME: &'static str;
    /// Register save area (or native fiber handle).
    type Context;
    /// Memory the context executes on.
    type Stack: Send + Sync;

    /// Allocate a stack with at least `size` usable bytes.
    fn allocate_stack(size: usize) -> io::Result<Self::Stack>;

    /// Usable size of `stack` in bytes.
    fn stack_size(stack: &Self::Stack) -> usize;

    /// A context that has never run. Filled on the first switch away from
    /// it (thread contexts) or by `create_context`.
    fn empty_context() -> Self::Context;

    /// Turn the calling OS thread into something `switch_context` can
    /// leave from and come back to.
    fn convert_thread(ctx: &mut Self::Context) -> io::Result<()>;

    /// Undo [`Platform::convert_thread`].
    ///
    /// # Safety
    ///
    /// `ctx` must be the converted context of the calling thread and must
    /// be the one currently executing.
    unsafe fn revert_thread(ctx: &mut Self::Context);

    /// Prime `ctx` so that the first switch into it calls `entry(arg)` on
    /// `stack`.
    ///
    /// # Safety
    ///
    /// `ctx` must not be executing, must stay at the same address until it
    /// is destroyed, and `stack` must outlive every switch into `ctx`.
    unsafe fn create_context(
        ctx: *mut Self::Context,
        stack: &Self::Stack,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> io::Result<()>;

    /// Save the running state into `from`, resume `to`.
    ///
    /// # Safety
    ///
    /// `from` must be the context currently executing on this thread and
    /// `to` must be primed or previously saved and not executing anywhere.
    unsafe fn switch_context(from: *mut Self::Context, to: *const Self::Context);

    /// Release whatever the back-end attached to `ctx`.
    ///
    /// # Safety
    ///
    /// `ctx` must not be executing.
    unsafe fn destroy_context(ctx: &mut Self::Context);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static HITS: AtomicUsize = AtomicUsize::new(0);

    struct Pair {
        main: Context,
        side: Context,
    }

    unsafe extern "C" fn bounce(arg: *mut c_void) -> ! {
        let pair = arg.cast::<Pair>();
        loop {
            HITS.fetch_add(1, Ordering::SeqCst);
            Native::switch_context(ptr::addr_of_mut!((*pair).side), ptr::addr_of!((*pair).main));
        }
    }

    #[test]
    fn switch_into_primed_context_and_back() {
        let stack = Native::allocate_stack(64 * 1024).unwrap();
        let mut pair = Box::new(Pair {
            main: Native::empty_context(),
            side: Native::empty_context(),
        });
        let p: *mut Pair = &mut *pair;
        let before = HITS.load(Ordering::SeqCst);
        unsafe {
            let main = ptr::addr_of_mut!((*p).main);
            let side = ptr::addr_of_mut!((*p).side);
            Native::convert_thread(&mut *main).unwrap();
            Native::create_context(side, &stack, bounce, p.cast()).unwrap();
            Native::switch_context(main, side);
            Native::switch_context(main, side);
            Native::destroy_context(&mut *side);
            Native::revert_thread(&mut *main);
        }
        assert_eq!(HITS.load(Ordering::SeqCst), before + 2);
    }

    #[test]
    fn backend_name_matches_target() {
        let expected = if cfg!(windows) {
            "windows-fibers"
        } else if cfg!(target_arch = "x86_64") {
            "x86_64-sysv"
        } else {
            "aarch64-aapcs64"
        };
        assert_eq!(BACKEND, expected);
    }

    #[cfg(unix)]
    #[test]
    fn self_switch_keeps_going() {
        let mut ctx = Native::empty_context();
        let marker = [7u64, 11, 13, 17];
        let c: *mut Context = &mut ctx;
        unsafe { Native::switch_context(c, c) };
        assert_eq!(marker, [7, 11, 13, 17]);
    }
}
