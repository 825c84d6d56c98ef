//! CPU exception handlers.
//!
//! An exception in kernel mode is fatal: the handler fills a
//! [`PanicFrame`] and hands it to the panic renderer. An exception raised
//! from ring 3 terminates only the faulting process — the handler marks it
//! terminated and schedules away; its parked kernel context is simply
//! never resumed.

use crate::panic::{PanicFrame, exception_name, panic_with_frame};

use super::super::idt::{self, InterruptStackFrame};

/// Reads CR2, the faulting address of the most recent page fault.
fn read_cr2() -> u64 {
    let value: u64;
    // SAFETY: Reading CR2 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

fn frame_for(vector: u64, error_code: u64, frame: &InterruptStackFrame) -> PanicFrame {
    PanicFrame {
        vector,
        error_code,
        cr2: if vector == 0xE { read_cr2() } else { 0 },
        rip: frame.rip,
        cs: frame.cs,
        rflags: frame.rflags,
        rsp: frame.rsp,
        ss: frame.ss,
    }
}

/// Common exception tail: kill the faulting user process, or panic the
/// kernel.
fn handle_fault(vector: u64, error_code: u64, frame: &InterruptStackFrame) {
    if frame.from_user() {
        crate::kwarn!(
            "pid {}: {} at {:#x} (error {:#x}), terminating",
            crate::proc::sched::current_pid(),
            exception_name(vector),
            frame.rip,
            error_code,
        );
        crate::proc::sched::exit_current(-1);
    }
    panic_with_frame(exception_name(vector), Some(&frame_for(vector, error_code, frame)));
}

macro_rules! exception {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame) {
            handle_fault($vector, 0, &frame);
        }
    };
}

macro_rules! exception_with_code {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame, error_code: u64) {
            handle_fault($vector, error_code, &frame);
        }
    };
}

exception!(divide_error, 0);
exception!(debug, 1);
exception!(nmi, 2);
exception!(breakpoint, 3);
exception!(overflow, 4);
exception!(bound_range, 5);
exception!(invalid_opcode, 6);
exception!(device_not_available, 7);
exception_with_code!(invalid_tss, 10);
exception_with_code!(segment_not_present, 11);
exception_with_code!(stack_segment_fault, 12);
exception_with_code!(general_protection, 13);
exception_with_code!(page_fault, 14);
exception!(x87_floating_point, 16);
exception_with_code!(alignment_check, 17);
exception!(simd_floating_point, 19);
exception!(virtualization, 20);
exception_with_code!(control_protection, 21);

/// A double fault cannot return; the machine state is already suspect.
extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, error_code: u64) -> ! {
    panic_with_frame("Double Fault", Some(&frame_for(8, error_code, &frame)));
}

extern "x86-interrupt" fn machine_check(frame: InterruptStackFrame) {
    handle_fault(18, 0, &frame);
}

/// Wires vectors 0..21 to their gates.
pub(in crate::arch) fn install_exception_gates() {
    idt::set_handler(0, divide_error);
    idt::set_handler(1, debug);
    idt::set_handler(2, nmi);
    idt::set_handler(3, breakpoint);
    idt::set_handler(4, overflow);
    idt::set_handler(5, bound_range);
    idt::set_handler(6, invalid_opcode);
    idt::set_handler(7, device_not_available);
    idt::set_diverging_handler(8, double_fault);
    idt::set_handler_with_code(10, invalid_tss);
    idt::set_handler_with_code(11, segment_not_present);
    idt::set_handler_with_code(12, stack_segment_fault);
    idt::set_handler_with_code(13, general_protection);
    idt::set_handler_with_code(14, page_fault);
    idt::set_handler(16, x87_floating_point);
    idt::set_handler_with_code(17, alignment_check);
    idt::set_handler(18, machine_check);
    idt::set_handler(19, simd_floating_point);
    idt::set_handler(20, virtualization);
    idt::set_handler_with_code(21, control_protection);
}
