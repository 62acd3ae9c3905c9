use serde::Serialize;

use crate::emulator::Emulator;

/// A runtime trap, with enough machine state to show the user where it
/// happened. The call stack has the faulting pc appended.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeException {
    pub message: String,
    pub pc: u32,
    pub registers: [u32; 32],
    pub call_stack: Vec<u32>,
}

impl std::fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at 0x{:08X}", self.message, self.pc)
    }
}

impl Emulator {
    pub(crate) fn new_exception(&mut self, message: String) -> RuntimeException {
        let mut call_stack = self.call_stack.clone();
        call_stack.push(self.pc);
        let exception = RuntimeException {
            message,
            pc: self.pc,
            registers: self.registers,
            call_stack,
        };
        self.report_exception(exception.clone());
        exception
    }

    fn report_exception(&mut self, exception: RuntimeException) {
        self.errors.push(exception.clone());
        if !self.terminated() {
            if let Some(cb) = self.runtime_error_callback.as_mut() {
                cb(&exception);
            }
        }
    }

    pub(crate) fn exception_uninitialized_memory(&mut self, addr: u32) {
        self.new_exception(format!("Memory accessed before initialized at 0x{addr:08X}"));
    }

    pub(crate) fn exception_unaligned_access(&mut self, addr: u32, access_type: &str) {
        self.new_exception(format!(
            "Memory access not aligned at 0x{addr:08X} for type {access_type}"
        ));
    }

    pub(crate) fn exception_uninitialized_register(&mut self, register: u32) {
        self.new_exception(format!("Register accessed before initialized: x{register}"));
    }

    pub(crate) fn exception_segmentation_fault(&mut self, addr: u32) {
        // addr arrives relative to the reserved window base
        let addr = addr.wrapping_add(0x8000_0000);
        self.new_exception(format!("Segmentation fault accessing 0x{addr:08X}"));
    }

    pub(crate) fn exception_illegal_register_write(&mut self) {
        self.new_exception("Illegal register write to read-only register x0".to_string());
    }
}
