// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! x86-64 System V back-end.
//!
//! Context = 6 callee-saved GPRs + rdi/rsi + rsp + rip + float control
//! (11 words). `rdi`/`rsi` only matter for a fresh context: they carry the
//! entry argument and the entry function into the trampoline. MXCSR and
//! the x87 control word are callee-saved under System V, so they travel
//! with the context.

use std::arch::{asm, global_asm};
use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;

use super::stack::Stack;
use super::{EntryFn, Platform};

/// Saved register file. Field order is fixed by the offsets below.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    rbx: usize,
    rbp: usize,
    r12: usize,
    r13: usize,
    r14: usize,
    r15: usize,
    rdi: usize,
    rsi: usize,
    rsp: usize,
    rip: usize,
    mxcsr: u32,
    fpucw: u16,
    _pad: u16,
}

const RBX: usize = 0x00;
const RBP: usize = 0x08;
const R12: usize = 0x10;
const R13: usize = 0x18;
const R14: usize = 0x20;
const R15: usize = 0x28;
const RDI: usize = 0x30;
const RSI: usize = 0x38;
const RSP: usize = 0x40;
const RIP: usize = 0x48;
const MXCSR: usize = 0x50;
const FPUCW: usize = 0x54;

const _: () = {
    assert!(mem::offset_of!(Context, rbx) == RBX);
    assert!(mem::offset_of!(Context, rbp) == RBP);
    assert!(mem::offset_of!(Context, r12) == R12);
    assert!(mem::offset_of!(Context, r13) == R13);
    assert!(mem::offset_of!(Context, r14) == R14);
    assert!(mem::offset_of!(Context, r15) == R15);
    assert!(mem::offset_of!(Context, rdi) == RDI);
    assert!(mem::offset_of!(Context, rsi) == RSI);
    assert!(mem::offset_of!(Context, rsp) == RSP);
    assert!(mem::offset_of!(Context, rip) == RIP);
    assert!(mem::offset_of!(Context, mxcsr) == MXCSR);
    assert!(mem::offset_of!(Context, fpucw) == FPUCW);
    assert!(mem::size_of::<Context>() == 11 * 8);
};

// switch(from = rdi, to = rsi)
//
// The saved rip is our own return address and the saved rsp is the value
// rsp will have after returning, so resuming is a plain `jmp` for both
// saved and freshly primed contexts.
macro_rules! define_switch {
    ($section:literal, $switch:literal, $trampoline:literal) => {
        global_asm!(
            $section,
            ".p2align 4",
            concat!(".globl ", $switch),
            concat!($switch, ":"),
            "mov rax, [rsp]",
            "lea rdx, [rsp + 8]",
            "mov [rdi + {off_rbx}], rbx",
            "mov [rdi + {off_rbp}], rbp",
            "mov [rdi + {off_r12}], r12",
            "mov [rdi + {off_r13}], r13",
            "mov [rdi + {off_r14}], r14",
            "mov [rdi + {off_r15}], r15",
            "mov [rdi + {off_rsp}], rdx",
            "mov [rdi + {off_rip}], rax",
            "stmxcsr dword ptr [rdi + {off_mxcsr}]",
            "fnstcw word ptr [rdi + {off_fpucw}]",
            "mov rbx, [rsi + {off_rbx}]",
            "mov rbp, [rsi + {off_rbp}]",
            "mov r12, [rsi + {off_r12}]",
            "mov r13, [rsi + {off_r13}]",
            "mov r14, [rsi + {off_r14}]",
            "mov r15, [rsi + {off_r15}]",
            "ldmxcsr dword ptr [rsi + {off_mxcsr}]",
            "fldcw word ptr [rsi + {off_fpucw}]",
            "mov rsp, [rsi + {off_rsp}]",
            "mov rax, [rsi + {off_rip}]",
            "mov rdi, [rsi + {off_rdi}]",
            "mov rsi, [rsi + {off_rsi}]",
            "jmp rax",
            // Fresh contexts land here with rdi = arg, rsi = entry and
            // rsp 16-byte aligned, so the call leaves the callee with the
            // usual rsp % 16 == 8.
            ".p2align 4",
            concat!(".globl ", $trampoline),
            concat!($trampoline, ":"),
            "xor ebp, ebp",
            "call rsi",
            "ud2",
            off_rbx = const RBX,
            off_rbp = const RBP,
            off_r12 = const R12,
            off_r13 = const R13,
            off_r14 = const R14,
            off_r15 = const R15,
            off_rdi = const RDI,
            off_rsi = const RSI,
            off_rsp = const RSP,
            off_rip = const RIP,
            off_mxcsr = const MXCSR,
            off_fpucw = const FPUCW,
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

/// MXCSR and x87 control word of the running thread.
fn float_control() -> (u32, u16) {
    let mut mxcsr = 0u32;
    let mut fpucw = 0u16;
    unsafe {
        asm!(
            "stmxcsr dword ptr [{}]",
            in(reg) ptr::addr_of_mut!(mxcsr),
            options(nostack, preserves_flags),
        );
        asm!(
            "fnstcw word ptr [{}]",
            in(reg) ptr::addr_of_mut!(fpucw),
            options(nostack, preserves_flags),
        );
    }
    (mxcsr, fpucw)
}

/// System V back-end.
pub struct SysV;

unsafe impl Platform for SysV {
    const NAME: &'static str = "x86_64-sysv";
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
        let top = stack.top() as usize & !15;
        // Two zeroed words: a null return address for whoever walks past
        // the trampoline, plus padding to keep the trampoline's rsp aligned.
        let sp = top - 16;
        (sp as *mut usize).write(0);
        ((sp + 8) as *mut usize).write(0);

        let (mxcsr, fpucw) = float_control();
        ctx.write(Context {
            rdi: arg as usize,
            rsi: entry as usize,
            rsp: sp,
            rip: strand_context_trampoline as *const () as usize,
            mxcsr,
            fpucw,
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
