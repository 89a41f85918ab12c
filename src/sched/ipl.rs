//! Interrupt priority level discipline.
//!
//! The run queue and every wait queue are mutated only with interrupts
//! masked. `IPL_HIGH` is raised around each mutation and the caller's prior
//! level is restored afterward — never blindly lowered, so nested raises
//! (e.g. `sched_make_runnable` called from inside `sched_switch`) behave
//! correctly.

use core::sync::atomic::{AtomicU8, Ordering};

pub const IPL_LOW: u8 = 0;
pub const IPL_HIGH: u8 = 7;

static CURRENT_IPL: AtomicU8 = AtomicU8::new(IPL_LOW);

pub fn getipl() -> u8 {
    CURRENT_IPL.load(Ordering::SeqCst)
}

/// Sets the IPL, returning the previous value so the caller can restore it.
pub fn setipl(level: u8) -> u8 {
    CURRENT_IPL.swap(level, Ordering::SeqCst)
}

#[cfg(not(test))]
pub fn disable() {
    x86_64::instructions::interrupts::disable();
}

#[cfg(not(test))]
pub fn enable() {
    x86_64::instructions::interrupts::enable();
}

#[cfg(not(test))]
pub fn wait_for_interrupt() {
    x86_64::instructions::hlt();
}

#[cfg(test)]
pub fn disable() {}

#[cfg(test)]
pub fn enable() {}

#[cfg(test)]
pub fn wait_for_interrupt() {
    // Tests never call sched_switch with an empty run queue, so this is
    // unreachable in practice; panic loudly if that assumption breaks.
    panic!("wait_for_interrupt: run queue was empty with no hardware to wait on");
}

/// Runs `f` with IPL raised to `level`, restoring the caller's IPL afterward.
pub fn with_ipl<T>(level: u8, f: impl FnOnce() -> T) -> T {
    let prev = setipl(level);
    let result = f();
    setipl(prev);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_ipl_restores_previous_level() {
        assert_eq!(getipl(), IPL_LOW);
        with_ipl(IPL_HIGH, || {
            assert_eq!(getipl(), IPL_HIGH);
        });
        assert_eq!(getipl(), IPL_LOW);
    }

    #[test]
    fn nested_raises_restore_outer_level() {
        with_ipl(IPL_HIGH, || {
            with_ipl(IPL_HIGH, || {
                assert_eq!(getipl(), IPL_HIGH);
            });
            assert_eq!(getipl(), IPL_HIGH);
        });
        assert_eq!(getipl(), IPL_LOW);
    }
}
