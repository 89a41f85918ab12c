//! Raw register context saved/restored across a real context switch.
//!
//! This is the one piece of the scheduler that is genuinely hardware, not
//! policy: `context_switch`/`context_setup` are opaque collaborators with no
//! host-testable semantics, only ever invoked from `#[cfg(not(test))]` code
//! — the queue/state machine around it is what gets unit tested.

#[cfg(not(test))]
use core::arch::naked_asm;

/// Callee-saved x86_64 System V registers plus the resume address.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl Context {
    pub const fn empty() -> Self {
        Context { rsp: 0, rbp: 0, rbx: 0, r12: 0, r13: 0, r14: 0, r15: 0, rip: 0 }
    }

    /// Builds a fresh context that will start executing at `entry` once
    /// switched into, with its stack pointer aligned per the System V ABI.
    pub fn new(entry: u64, stack_top: u64) -> Self {
        let aligned_sp = (stack_top - 8) & !0xF;
        Context { rsp: aligned_sp, rbp: 0, rbx: 0, r12: 0, r13: 0, r14: 0, r15: 0, rip: entry }
    }
}

/// Switches from `old` to `new`, saving the caller's registers into `old`
/// and resuming execution wherever `new` last left off.
///
/// # Safety
/// Both pointers must reference live, correctly laid out [`Context`]
/// values with valid stack pointers belonging to threads this scheduler
/// owns.
#[cfg(not(test))]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old: *mut Context, new: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x38], rax",

        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",

        "jmp [rsi + 0x38]",

        "2:",
        "ret",
    );
}

/// Restores `new` without saving any prior context (the outgoing thread is
/// dead and nothing needs to resume it).
///
/// # Safety
/// `new` must reference a live [`Context`].
#[cfg(not(test))]
#[unsafe(naked)]
pub unsafe extern "C" fn restore_context(new: *const Context) {
    naked_asm!(
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
        "jmp [rdi + 0x38]",
    );
}

/// Host-test stand-ins. Nothing in the test suite actually runs two
/// concurrent kernel stacks, so these only need to preserve `old`'s value
/// for the caller's bookkeeping, never a real stack swap.
#[cfg(test)]
pub unsafe fn switch_context(old: *mut Context, new: *const Context) {
    unsafe {
        *old = *old;
        let _ = new;
    }
}

#[cfg(test)]
pub unsafe fn restore_context(_new: *const Context) {}
