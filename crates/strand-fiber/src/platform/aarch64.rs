// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! AArch64 (AAPCS64) back-end, Linux and Apple silicon.
//!
//! Context = x19-x28, fp, lr, sp, ip0/ip1, d8-d15, fpcr. x18 is left
//! alone: it is the platform register on Apple targets.

use std::arch::{asm, global_asm};
use std::ffi::c_void;
use std::io;
use std::mem;

use super::stack::Stack;
use super::{EntryFn, Platform};

/// Saved register file. Pairs stored with `stp` must stay adjacent.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    x19: usize,
    x20: usize,
    x21: usize,
    x22: usize,
    x23: usize,
    x24: usize,
    x25: usize,
    x26: usize,
    x27: usize,
    x28: usize,
    fp: usize,
    lr: usize,
    sp: usize,
    /// Entry argument for a fresh context.
    ip0: usize,
    /// Entry function for a fresh context.
    ip1: usize,
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
    /// Rounding mode and flush-to-zero bits.
    fpcr: u64,
}

const X19: usize = 0;
const X21: usize = 16;
const X23: usize = 32;
const X25: usize = 48;
const X27: usize = 64;
const FP: usize = 80;
const SP: usize = 96;
const IP0: usize = 104;
const D8: usize = 120;
const D10: usize = 136;
const D12: usize = 152;
const D14: usize = 168;
const FPCR: usize = 184;

const _: () = {
    assert!(mem::offset_of!(Context, x19) == X19);
    assert!(mem::offset_of!(Context, x20) == X19 + 8);
    assert!(mem::offset_of!(Context, x21) == X21);
    assert!(mem::offset_of!(Context, x22) == X21 + 8);
    assert!(mem::offset_of!(Context, x23) == X23);
    assert!(mem::offset_of!(Context, x24) == X23 + 8);
    assert!(mem::offset_of!(Context, x25) == X25);
    assert!(mem::offset_of!(Context, x26) == X25 + 8);
    assert!(mem::offset_of!(Context, x27) == X27);
    assert!(mem::offset_of!(Context, x28) == X27 + 8);
    assert!(mem::offset_of!(Context, fp) == FP);
    assert!(mem::offset_of!(Context, lr) == FP + 8);
    assert!(mem::offset_of!(Context, sp) == SP);
    assert!(mem::offset_of!(Context, ip0) == IP0);
    assert!(mem::offset_of!(Context, ip1) == IP0 + 8);
    assert!(mem::offset_of!(Context, d8) == D8);
    assert!(mem::offset_of!(Context, d9) == D8 + 8);
    assert!(mem::offset_of!(Context, d10) == D10);
    assert!(mem::offset_of!(Context, d11) == D10 + 8);
    assert!(mem::offset_of!(Context, d12) == D12);
    assert!(mem::offset_of!(Context, d13) == D12 + 8);
    assert!(mem::offset_of!(Context, d14) == D14);
    assert!(mem::offset_of!(Context, d15) == D14 + 8);
    assert!(mem::offset_of!(Context, fpcr) == FPCR);
    assert!(mem::size_of::<Context>() == 24 * 8);
};

// switch(from = x0, to = x1)
//
// lr is saved as the resume address: `ret` returns into the caller of a
// saved context, or into the trampoline for a fresh one.
macro_rules! define_switch {
    ($section:literal, $switch:literal, $trampoline:literal) => {
        global_asm!(
            $section,
            ".p2align 4",
            concat!(".globl ", $switch),
            concat!($switch, ":"),
            "stp x19, x20, [x0, #{off_x19}]",
            "stp x21, x22, [x0, #{off_x21}]",
            "stp x23, x24, [x0, #{off_x23}]",
            "stp x25, x26, [x0, #{off_x25}]",
            "stp x27, x28, [x0, #{off_x27}]",
            "stp x29, x30, [x0, #{off_fp}]",
            "mov x9, sp",
            "str x9, [x0, #{off_sp}]",
            "stp d8, d9, [x0, #{off_d8}]",
            "stp d10, d11, [x0, #{off_d10}]",
            "stp d12, d13, [x0, #{off_d12}]",
            "stp d14, d15, [x0, #{off_d14}]",
            "mrs x9, fpcr",
            "str x9, [x0, #{off_fpcr}]",
            "ldp x19, x20, [x1, #{off_x19}]",
            "ldp x21, x22, [x1, #{off_x21}]",
            "ldp x23, x24, [x1, #{off_x23}]",
            "ldp x25, x26, [x1, #{off_x25}]",
            "ldp x27, x28, [x1, #{off_x27}]",
            "ldp x29, x30, [x1, #{off_fp}]",
            "ldr x9, [x1, #{off_sp}]",
            "mov sp, x9",
            "ldp d8, d9, [x1, #{off_d8}]",
            "ldp d10, d11, [x1, #{off_d10}]",
            "ldp d12, d13, [x1, #{off_d12}]",
            "ldp d14, d15, [x1, #{off_d14}]",
            "ldr x9, [x1, #{off_fpcr}]",
            "msr fpcr, x9",
            "ldp x16, x17, [x1, #{off_ip0}]",
            "ret",
            ".p2align 4",
            concat!(".globl ", $trampoline),
            concat!($trampoline, ":"),
            "mov x0, x16",
            "blr x17",
            "brk #0x1",
            off_x19 = const X19,
            off_x21 = const X21,
            off_x23 = const X23,
            off_x25 = const X25,
            off_x27 = const X27,
            off_fp = const FP,
            off_sp = const SP,
            off_ip0 = const IP0,
            off_d8 = const D8,
            off_d10 = const D10,
            off_d12 = const D12,
            off_d14 = const D14,
            off_fpcr = const FPCR,
        );
    };
}

#[cfg(target_vendor = "apple")]
define_switch!(
    ".section __TEXT,__text",
    "_strand_switch_context",
    "_strand_context_trampoline"
);
#[cfg(not(target_vendor = "apple"))]
define_switch!(
    ".section .text",
    "strand_switch_context",
    "strand_context_trampoline"
);

extern "C" {
    fn strand_switch_context(from: *mut Context, to: *const Context);
    fn strand_context_trampoline();
}

fn fpcr() -> u64 {
    let value: u64;
    unsafe { asm!("mrs {}, fpcr", out(reg) value, options(nomem, nostack, preserves_flags)) };
    value
}

/// AAPCS64 back-end.
pub struct Aapcs64;

unsafe impl Platform for Aapcs64 {
    const NAME: &'static str = "aarch64-aapcs64";
    type Context = Context;
    type Stack = Stack;

    fn allocate_stack(size: usize) -> io::Result<Stack> {
        Stack::new(size)
    }

    fn stack_size(stack: &Stack) -> usize {
        stack.size()
    }

    fn empty_context() -> Context {
        Context::default()
    }

    fn convert_thread(_ctx: &mut Context) -> io::Result<()> {
        Ok(())
    }

    unsafe fn revert_thread(_ctx: &mut Context) {}

    unsafe fn create_context(
        ctx: *mut Context,
        stack: &Stack,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> io::Result<()> {
        ctx.write(Context {
            sp: stack.top() as usize & !15,
            lr: strand_context_trampoline as *const () as usize,
            ip0: arg as usize,
            ip1: entry as usize,
            fpcr: fpcr(),
            ..Context::default()
        });
        Ok(())
    }

    #[inline(always)]
    unsafe fn switch_context(from: *mut Context, to: *const Context) {
        strand_switch_context(from, to);
    }

    unsafe fn destroy_context(_ctx: &mut Context) {}
}
