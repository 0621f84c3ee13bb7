// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Windows back-end: native OS fibers.
//!
//! No hand-written assembly. The OS owns the stack and the register save
//! area; `FIBER_FLAG_FLOAT_SWITCH` makes it preserve float/SIMD state too.

use std::ffi::c_void;
use std::io;
use std::ptr;

use windows_sys::Win32::System::Threading::{
    ConvertFiberToThread, ConvertThreadToFiberEx, CreateFiberEx, DeleteFiber, SwitchToFiber,
};
use windows_sys::Win32::System::WindowsProgramming::FIBER_FLAG_FLOAT_SWITCH;

use super::{EntryFn, Platform};

/// Native fiber handle plus the entry the start routine forwards to.
#[derive(Debug)]
pub struct Context {
    fiber: *mut c_void,
    entry: Option<EntryFn>,
    arg: *mut c_void,
    /// Handle came from `ConvertThreadToFiberEx`; never `DeleteFiber` it.
    thread: bool,
}

/// Reserve size handed to `CreateFiberEx`. The OS maps the memory.
#[derive(Debug)]
pub struct Stack {
    reserve: usize,
}

unsafe extern "system" fn fiber_start(param: *mut c_void) {
    let ctx = &*(param as *const Context);
    match ctx.entry {
        Some(entry) => entry(ctx.arg),
        None => std::process::abort(),
    }
}

/// Windows fiber back-end.
pub struct WinFiber;

unsafe impl Platform for WinFiber {
    const NAME: &'static str = "windows-fibers";
    type Context = Context;
    type Stack = Stack;

    fn allocate_stack(size: usize) -> io::Result<Stack> {
        Ok(Stack { reserve: size })
    }

    fn stack_size(stack: &Stack) -> usize {
        stack.reserve
    }

    fn empty_context() -> Context {
        Context {
            fiber: ptr::null_mut(),
            entry: None,
            arg: ptr::null_mut(),
            thread: false,
        }
    }

    fn convert_thread(ctx: &mut Context) -> io::Result<()> {
        let fiber = unsafe { ConvertThreadToFiberEx(ptr::null(), FIBER_FLAG_FLOAT_SWITCH) };
        if fiber.is_null() {
            return Err(io::Error::last_os_error());
        }
        ctx.fiber = fiber;
        ctx.thread = true;
        Ok(())
    }

    unsafe fn revert_thread(ctx: &mut Context) {
        if ctx.thread && !ctx.fiber.is_null() {
            ConvertFiberToThread();
            ctx.fiber = ptr::null_mut();
        }
    }

    unsafe fn create_context(
        ctx: *mut Context,
        stack: &Stack,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> io::Result<()> {
        // Native fibers cannot be re-primed in place; replace the handle.
        Self::destroy_context(&mut *ctx);
        (*ctx).entry = Some(entry);
        (*ctx).arg = arg;
        let fiber = CreateFiberEx(
            0,
            stack.reserve,
            FIBER_FLAG_FLOAT_SWITCH,
            Some(fiber_start),
            ctx as *const c_void,
        );
        if fiber.is_null() {
            return Err(io::Error::last_os_error());
        }
        (*ctx).fiber = fiber;
        Ok(())
    }

    #[inline(always)]
    unsafe fn switch_context(_from: *mut Context, to: *const Context) {
        SwitchToFiber((*to).fiber);
    }

    unsafe fn destroy_context(ctx: &mut Context) {
        if !ctx.thread && !ctx.fiber.is_null() {
            DeleteFiber(ctx.fiber);
            ctx.fiber = ptr::null_mut();
        }
    }
}
