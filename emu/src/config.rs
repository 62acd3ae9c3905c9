use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::debug::{Breakpoint, DebugSymbols};
use crate::emulator::{Emulator, Interrupt, InterruptSender, TerminateHandle, END_SENTINEL};
use crate::exceptions::RuntimeException;
use crate::memory::MemoryImage;
use crate::peripherals::{VirtualDisplay, VirtualFileSystem};

pub struct EmulatorConfig {
    pub stack_start_address: u32,
    pub global_data_address: u32,
    pub os_global_pointer: u32,
    pub heap_start_address: u32,
    pub memory: MemoryImage,
    pub profile_ignore_range_start: u32,
    pub profile_ignore_range_end: u32,
    /// Dynamic-instruction budget; instructions in the ignore range are free.
    pub runtime_limit: u32,
    pub runtime_error_callback: Option<Box<dyn FnMut(&RuntimeException)>>,
    pub stdout_callback: Option<Box<dyn FnMut(u8)>>,
    /// 0 derives a seed from the clock.
    pub random_seed: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            stack_start_address: 0x7FFF_FFF0,
            global_data_address: 0,
            os_global_pointer: 0,
            heap_start_address: 0x1000_0000,
            memory: MemoryImage::new(),
            profile_ignore_range_start: 0,
            profile_ignore_range_end: 0,
            runtime_limit: 1_000_000,
            runtime_error_callback: None,
            stdout_callback: None,
            random_seed: 0,
        }
    }
}

/// Registers x0-x3 and x8 start initialized (zero, ra, sp, gp, fp).
const INITIAL_REG_MASK: u32 = 0x10F;

impl Emulator {
    pub fn new(mut config: EmulatorConfig) -> Emulator {
        let mut registers = [0u32; 32];
        registers[1] = END_SENTINEL;
        registers[2] = config.stack_start_address;
        registers[3] = config.global_data_address;
        registers[8] = config.stack_start_address;

        // the program may read the empty stack top
        config.memory.write_word(config.stack_start_address, END_SENTINEL);

        let random_seed = if config.random_seed == 0 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0x2035)
        } else {
            config.random_seed
        };

        Emulator {
            registers,
            memory: config.memory,
            pc: 0,
            reg_init: INITIAL_REG_MASK,
            i_cache: None,
            d_cache: None,
            runtime_limit: config.runtime_limit,
            os_entry: 0,
            os_global_pointer: config.os_global_pointer,
            os_interrupt_entry: 0,
            executed_instructions: 0,
            user_global_pointer: config.global_data_address,
            in_os_code: false,
            exit_code: 0,
            heap_pointer: config.heap_start_address,
            was_ecall: false,
            register_preservation: [0; 32],
            random_seed,
            solution_validity: 0,
            display: Arc::new(VirtualDisplay::default()),
            fs: None,
            interrupt: None,
            pending_interrupt: Arc::new(Mutex::new(None)),
            profile_ignore_start: config.profile_ignore_range_start,
            profile_ignore_end: config.profile_ignore_range_end,
            di: 0,
            mem_usage: 0,
            reg_usage: 0,
            errors: Vec::new(),
            call_stack: Vec::new(),
            breakpoints: HashMap::new(),
            register_breakpoints: HashMap::new(),
            memory_breakpoints: HashMap::new(),
            break_addr: 0xFFFF_FFFF,
            break_next: false,
            symbols: None,
            stdout_callback: config.stdout_callback,
            runtime_error_callback: config.runtime_error_callback,
            break_callback: None,
            terminate_flag: Arc::new(AtomicBool::new(false)),
            last_used_registers: HashSet::new(),
        }
    }

    /// Restores the post-reset register file so a second image can run on the
    /// same instance.
    pub fn reset_registers(&mut self, stack_start_address: u32, global_data_address: u32) {
        self.registers = [0; 32];
        self.registers[1] = END_SENTINEL;
        self.registers[2] = stack_start_address;
        self.registers[3] = global_data_address;
        self.registers[8] = stack_start_address;
        self.user_global_pointer = global_data_address;
        self.call_stack.clear();
        self.reg_init = INITIAL_REG_MASK;
        self.last_used_registers.clear();
    }

    // ------------------------------------------------------------------------
    // External control

    pub fn terminate(&self) {
        self.terminate_flag.store(true, Ordering::Relaxed);
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle(self.terminate_flag.clone())
    }

    /// Parks an interrupt for the next cycle boundary. Ignored while another
    /// interrupt is pending or being serviced.
    pub fn interrupt(&mut self, interrupt: Interrupt) {
        if self.interrupt.is_some() {
            return;
        }
        let mut slot = self.pending_interrupt.lock().unwrap();
        if slot.is_none() {
            *slot = Some(interrupt);
        }
    }

    pub fn interrupt_sender(&self) -> InterruptSender {
        InterruptSender(self.pending_interrupt.clone())
    }

    pub fn set_filesystem(&mut self, fs: VirtualFileSystem) {
        self.fs = Some(fs);
    }

    pub fn set_debug_symbols(&mut self, symbols: DebugSymbols) {
        self.symbols = Some(symbols);
    }

    pub fn set_break_callback(&mut self, callback: Box<dyn FnMut(i32, &str)>) {
        self.break_callback = Some(callback);
    }

    // ------------------------------------------------------------------------
    // Accessors

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn memory_usage(&self) -> u32 {
        self.mem_usage
    }

    pub fn register_usage(&self) -> u32 {
        self.reg_usage
    }

    pub fn dynamic_instruction_count(&self) -> u32 {
        self.di
    }

    pub fn total_instructions_executed(&self) -> u64 {
        self.executed_instructions
    }

    pub fn solution_validity(&self) -> u32 {
        self.solution_validity
    }

    pub fn errors(&self) -> &[RuntimeException] {
        &self.errors
    }

    pub fn display(&self) -> Arc<VirtualDisplay> {
        self.display.clone()
    }

    pub fn registers(&self) -> &[u32; 32] {
        &self.registers
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn call_stack(&self) -> &[u32] {
        &self.call_stack
    }

    pub fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    pub fn random_seed(&self) -> u32 {
        self.random_seed
    }

    pub fn last_used_registers(&self) -> impl Iterator<Item = u32> + '_ {
        self.last_used_registers.iter().copied()
    }

    /// Drops everything outside a0-a7 from the used-register view.
    pub fn reset_last_used_registers(&mut self) {
        self.last_used_registers.retain(|&r| (10..=17).contains(&r));
    }

    // ------------------------------------------------------------------------
    // Breakpoints

    pub fn add_breakpoint(&mut self, addr: u32, breakpoint: Breakpoint) {
        self.breakpoints.insert(addr, breakpoint);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&addr);
    }

    pub fn remove_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn add_register_breakpoint(&mut self, reg: u32, breakpoint: Breakpoint) {
        self.register_breakpoints.insert(reg, breakpoint);
    }

    pub fn remove_all_register_breakpoints(&mut self) {
        self.register_breakpoints.clear();
    }

    pub fn add_memory_breakpoint(&mut self, addr: u32, breakpoint: Breakpoint) {
        self.memory_breakpoints.insert(addr, breakpoint);
    }

    pub fn remove_all_memory_breakpoints(&mut self) {
        self.memory_breakpoints.clear();
    }

    /// Arms a one-shot stop at `addr`, for step-over and step-out.
    pub fn set_step_target(&mut self, addr: u32) {
        self.break_addr = addr;
    }

    /// Arms a stop before the next in-scope instruction, for step-into.
    pub fn request_break_next(&mut self) {
        self.break_next = true;
    }
}
