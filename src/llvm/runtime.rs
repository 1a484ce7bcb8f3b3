//! Host routines compiled code calls back into.
//!
//! Faults raised by compiled code (division by zero, integer overflow, bad
//! indices, zero range steps) are reported through [`FAULT_HELPER`], which
//! records the first fault of the current call on the host thread. The
//! compiled function then raises the module's [`FAULT_FLAG`] and returns a
//! zero value; every caller checks the flag after a call and returns as
//! well, so control gets back to the stub without running anything else.

use crate::core::RuntimeError;
use std::cell::Cell;

/// Runtime routine `llvm.powi` lowers to.
pub const POWI_HELPER: &str = "__powidf2";

/// `void __stackjit_fault(i32)`, called with a [`Fault::code`].
pub const FAULT_HELPER: &str = "__stackjit_fault";

/// Module global set once a fault has been raised.
pub const FAULT_FLAG: &str = "__stackjit_faulted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ZeroDivision,
    Overflow,
    IndexOutOfRange,
    ZeroStep,
}

impl Fault {
    pub fn code(self) -> i32 {
        match self {
            Fault::ZeroDivision => 1,
            Fault::Overflow => 2,
            Fault::IndexOutOfRange => 3,
            Fault::ZeroStep => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Fault::ZeroDivision),
            2 => Some(Fault::Overflow),
            3 => Some(Fault::IndexOutOfRange),
            4 => Some(Fault::ZeroStep),
            _ => None,
        }
    }

    /// Label used for the LLVM block raising this fault.
    pub fn name(self) -> &'static str {
        match self {
            Fault::ZeroDivision => "zerodiv",
            Fault::Overflow => "overflow",
            Fault::IndexOutOfRange => "index",
            Fault::ZeroStep => "step",
        }
    }

    pub fn into_error(self) -> RuntimeError {
        match self {
            Fault::ZeroDivision => RuntimeError::ZeroDivision,
            Fault::Overflow => RuntimeError::Overflow,
            Fault::IndexOutOfRange => RuntimeError::IndexOutOfRange,
            Fault::ZeroStep => RuntimeError::ZeroStep,
        }
    }
}

thread_local! {
    static LAST_FAULT: Cell<i32> = const { Cell::new(0) };
}

/// `double __powidf2(double, int)`, the libcall behind `llvm.powi.f64.i32`.
pub extern "C" fn powidf2(base: f64, exponent: i32) -> f64 {
    base.powi(exponent)
}

/// Target of [`FAULT_HELPER`]. The first fault of a call wins.
pub extern "C" fn record_fault(code: i32) {
    LAST_FAULT.with(|last| {
        if last.get() == 0 {
            last.set(code);
        }
    });
}

pub fn clear_fault() {
    LAST_FAULT.with(|last| last.set(0));
}

/// The fault recorded since the last [`clear_fault`], if any.
pub fn take_fault() -> Option<Fault> {
    let code = LAST_FAULT.with(|last| last.replace(0));
    if code != 0 {
        log::debug!("compiled code raised fault {code}");
    }
    Fault::from_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powi_helper() {
        assert_eq!(powidf2(2.0, 10), 1024.0);
        assert_eq!(powidf2(2.0, -1), 0.5);
        assert_eq!(powidf2(3.0, 0), 1.0);
    }

    #[test]
    fn test_first_fault_wins() {
        clear_fault();
        assert_eq!(take_fault(), None);

        record_fault(Fault::IndexOutOfRange.code());
        record_fault(Fault::ZeroDivision.code());
        assert_eq!(take_fault(), Some(Fault::IndexOutOfRange));
        assert_eq!(take_fault(), None);

        record_fault(Fault::ZeroStep.code());
        clear_fault();
        assert_eq!(take_fault(), None);
    }

    #[test]
    fn test_fault_codes_map_to_errors() {
        for fault in [
            Fault::ZeroDivision,
            Fault::Overflow,
            Fault::IndexOutOfRange,
            Fault::ZeroStep,
        ] {
            assert_eq!(Fault::from_code(fault.code()), Some(fault));
        }
        assert_eq!(Fault::from_code(0), None);
        assert_eq!(Fault::Overflow.into_error(), RuntimeError::Overflow);
    }
}
