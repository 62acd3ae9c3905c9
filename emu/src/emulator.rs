use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arch::{
    decode_btype, decode_itype, decode_jtype, decode_rtype, decode_stype, decode_utype,
    get_opcode, sign_extend, OPCODE_AUIPC, OPCODE_BTYPE, OPCODE_ENV, OPCODE_ITYPE, OPCODE_JAL,
    OPCODE_JALR, OPCODE_LUI, OPCODE_MEM_ITYPE, OPCODE_RTYPE, OPCODE_STYPE,
};

use crate::debug::{Breakpoint, DebugSymbols};
use crate::exceptions::RuntimeException;
use crate::memory::MemoryImage;
use crate::peripherals::{VirtualDisplay, VirtualFileSystem};

/// Jumping here ends the run. Seeded into `ra` so that returning from the
/// entry function halts cleanly.
pub const END_SENTINEL: u32 = 0x20352035;
pub const END_SENTINEL_EVEN: u32 = 0x20352034;
/// Jumping here resumes the frame suspended by an interrupt. JALR clears
/// bit 0 of its target, so the even variant is reserved as well.
pub const RESUME_SENTINEL: u32 = 0x20352037;
pub const RESUME_SENTINEL_EVEN: u32 = 0x20352036;
/// The exit syscall parks the pc here; the next cycle's increment lands on
/// the end sentinel.
pub(crate) const EXIT_JUMP: u32 = 0x20352031;

/// An externally delivered interrupt, carrying its payload and, once active,
/// the user frame it suspended.
#[derive(Debug, Clone)]
pub struct Interrupt {
    pub id: u32,
    pub data: Vec<u32>,
    pub(crate) saved_registers: [u32; 32],
    pub(crate) saved_pc: u32,
    pub(crate) saved_call_stack: Vec<u32>,
}

impl Interrupt {
    pub fn new(id: u32, data: Vec<u32>) -> Interrupt {
        Interrupt {
            id,
            data,
            saved_registers: [0; 32],
            saved_pc: 0,
            saved_call_stack: Vec::new(),
        }
    }
}

/// Delivers interrupts from outside the interpreter thread.
#[derive(Clone)]
pub struct InterruptSender(pub(crate) Arc<Mutex<Option<Interrupt>>>);

impl InterruptSender {
    /// Parks the interrupt; dropped if one is already waiting.
    pub fn send(&self, interrupt: Interrupt) {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(interrupt);
        }
    }
}

/// Stops the run at the next cycle boundary.
#[derive(Clone)]
pub struct TerminateHandle(pub(crate) Arc<AtomicBool>);

impl TerminateHandle {
    pub fn terminate(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct Emulator {
    pub(crate) registers: [u32; 32],
    pub(crate) memory: MemoryImage,
    pub(crate) pc: u32,
    pub(crate) reg_init: u32,
    pub(crate) i_cache: Option<u32>,
    pub(crate) d_cache: Option<u32>,
    pub(crate) runtime_limit: u32,
    pub(crate) os_entry: u32,
    pub(crate) os_global_pointer: u32,
    pub(crate) os_interrupt_entry: u32,
    pub(crate) executed_instructions: u64,
    pub(crate) user_global_pointer: u32,
    pub(crate) in_os_code: bool,
    pub(crate) exit_code: i32,
    pub(crate) heap_pointer: u32,
    pub(crate) was_ecall: bool,
    pub(crate) register_preservation: [u32; 32],

    pub(crate) random_seed: u32,
    pub(crate) solution_validity: u32,

    pub(crate) display: Arc<VirtualDisplay>,
    pub(crate) fs: Option<VirtualFileSystem>,
    pub(crate) interrupt: Option<Interrupt>,
    pub(crate) pending_interrupt: Arc<Mutex<Option<Interrupt>>>,

    pub(crate) profile_ignore_start: u32,
    pub(crate) profile_ignore_end: u32,
    pub(crate) di: u32,
    pub(crate) mem_usage: u32,
    pub(crate) reg_usage: u32,
    pub(crate) errors: Vec<RuntimeException>,

    pub(crate) call_stack: Vec<u32>,
    pub(crate) breakpoints: HashMap<u32, Breakpoint>,
    pub(crate) register_breakpoints: HashMap<u32, Breakpoint>,
    pub(crate) memory_breakpoints: HashMap<u32, Breakpoint>,
    pub(crate) break_addr: u32,
    pub(crate) break_next: bool,
    pub(crate) symbols: Option<DebugSymbols>,
    pub(crate) stdout_callback: Option<Box<dyn FnMut(u8)>>,
    pub(crate) runtime_error_callback: Option<Box<dyn FnMut(&RuntimeException)>>,
    pub(crate) break_callback: Option<Box<dyn FnMut(i32, &str)>>,
    pub(crate) terminate_flag: Arc<AtomicBool>,
    pub(crate) last_used_registers: HashSet<u32>,
}

impl Emulator {
    /// True when accounting and safety checks apply at `pc`, i.e. it lies
    /// outside the profile-ignore range.
    pub(crate) fn profiling_at(&self, pc: u32) -> bool {
        pc < self.profile_ignore_start || pc >= self.profile_ignore_end
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminate_flag.load(Ordering::Relaxed)
    }

    pub(crate) fn send_output(&mut self, text: &str) {
        if let Some(cb) = self.stdout_callback.as_mut() {
            for b in text.bytes() {
                cb(b);
            }
        }
    }

    /// Runs from `start_addr` until a sentinel, the runtime limit, or
    /// termination. Register state carries over from the previous run, which
    /// allows pause and resume.
    pub fn emulate(&mut self, start_addr: u32) {
        self.pc = start_addr.wrapping_sub(4);

        // prime both caches with any resident page
        let first = self.memory.pages.keys().next().copied();
        self.i_cache = first;
        self.d_cache = first;

        while self.di < self.runtime_limit && !self.terminated() {
            self.pc = self.pc.wrapping_add(4);
            if self.pc == END_SENTINEL || self.pc == END_SENTINEL_EVEN {
                break;
            } else if self.pc == RESUME_SENTINEL || self.pc == RESUME_SENTINEL_EVEN {
                if let Some(frame) = self.interrupt.take() {
                    self.pc = frame.saved_pc;
                    self.registers = frame.saved_registers;
                    self.call_stack = frame.saved_call_stack;
                }
            }

            // a pending interrupt is activated only while none is in flight
            if self.interrupt.is_none() {
                let pending = self.pending_interrupt.lock().unwrap().take();
                if let Some(mut interrupt) = pending {
                    interrupt.saved_pc = self.pc;
                    interrupt.saved_registers = self.registers;
                    interrupt.saved_call_stack = self.call_stack.clone();
                    self.user_global_pointer = self.registers[3];
                    self.registers[3] = self.os_global_pointer;
                    self.in_os_code = true;
                    self.registers[1] = RESUME_SENTINEL;
                    self.interrupt = Some(interrupt);
                }
            }

            if self.profiling_at(self.pc) {
                self.di += 1;
                self.check_should_break();
            }

            if self.in_os_code && self.profiling_at(self.pc) {
                // leaving OS code: give the user frame back
                self.in_os_code = false;
                self.registers[3] = self.user_global_pointer;
                for i in 1..=30 {
                    self.registers[i] = self.register_preservation[i];
                }

                if self.was_ecall {
                    self.was_ecall = false;
                    // the OS returns values by rewriting the saved a0-a7 slots
                    for i in 0..8u32 {
                        let val = self.mem_read_word(self.registers[2].wrapping_sub(i * 4), false);
                        if val != self.registers[(i + 10) as usize] {
                            self.registers[(i + 10) as usize] = val;
                            self.reg_init |= 1 << (i + 10);
                            self.last_used_registers.insert(i + 10);
                        }
                    }
                }
            }

            let instruction = self.mem_read_word(self.pc, true);

            match get_opcode(instruction) {
                OPCODE_LUI => self.execute_lui(instruction),
                OPCODE_AUIPC => self.execute_auipc(instruction),
                OPCODE_JAL => self.execute_jal(instruction),
                OPCODE_JALR => self.execute_jalr(instruction),
                OPCODE_BTYPE => self.execute_btype(instruction),
                OPCODE_MEM_ITYPE => self.execute_mem_itype(instruction),
                OPCODE_ITYPE => self.execute_itype(instruction),
                OPCODE_RTYPE => self.execute_rtype(instruction),
                OPCODE_STYPE => self.execute_stype(instruction),
                OPCODE_ENV => self.execute_env(instruction),
                opcode => {
                    self.new_exception(format!("Unsupported opcode exception: {opcode}"));
                }
            }

            self.executed_instructions += 1;
        }

        if self.di >= self.runtime_limit {
            let notice = format!("***Infinite Loop? DI: {}***", self.di);
            self.send_output(&notice);
        }
    }

    // ------------------------------------------------------------------------
    // Register file

    pub(crate) fn reg_read(&mut self, reg: u32) -> u32 {
        let in_scope = self.profiling_at(self.pc);
        if self.reg_init & (1 << reg) == 0 && in_scope {
            self.exception_uninitialized_register(reg);
            return 0;
        }
        if in_scope {
            self.last_used_registers.insert(reg);
        }
        self.registers[reg as usize]
    }

    pub(crate) fn reg_write(&mut self, reg: u32, value: u32) {
        if self.profiling_at(self.pc) {
            if self.reg_init & (1 << reg) == 0 {
                self.reg_usage += 1;
            }
            self.reg_init |= 1 << reg;
            self.last_used_registers.insert(reg);
            if let Some(bp) = self.register_breakpoints.get(&reg) {
                let id = bp.id;
                self.fire_break(id, "data breakpoint");
            }
        }

        if reg == 0 {
            // x0 is read-only; OS code may clobber it silently
            if self.profiling_at(self.pc) {
                self.exception_illegal_register_write();
            }
            return;
        }

        self.registers[reg as usize] = value;
    }

    // ------------------------------------------------------------------------
    // Instruction semantics

    fn execute_lui(&mut self, instruction: u32) {
        let (_, rd, imm) = decode_utype(instruction);
        self.reg_write(rd, imm << 12);
    }

    fn execute_auipc(&mut self, instruction: u32) {
        let (_, rd, imm) = decode_utype(instruction);
        self.reg_write(rd, (imm << 12).wrapping_add(self.pc));
    }

    fn execute_jal(&mut self, instruction: u32) {
        let (_, rd, imm) = decode_jtype(instruction);

        if rd != 0 {
            self.reg_write(rd, self.pc.wrapping_add(4));
            if rd == 1 {
                self.call_stack.push(self.pc);
            }
        }

        // -4 because the cycle increments before the fetch
        self.pc = (self.pc as i32)
            .wrapping_add(sign_extend(imm, 21))
            .wrapping_sub(4) as u32;
    }

    fn execute_jalr(&mut self, instruction: u32) {
        let (_, rd, rs1, imm, _) = decode_itype(instruction);

        let pc_val = self.pc;
        if rs1 == 1 {
            if !self.call_stack.is_empty() {
                self.call_stack.pop();
                if self.break_addr != 0xFFFF_FFFF {
                    // stepping always stops when a frame pops
                    self.break_next = true;
                }
            }
        } else if rd == 1 {
            self.call_stack.push(self.pc);
        }

        let base = self.reg_read(rs1);
        self.pc = ((base.wrapping_add(sign_extend(imm, 12) as u32)) & 0xFFFF_FFFE).wrapping_sub(4);

        if rd != 0 {
            self.reg_write(rd, pc_val.wrapping_add(4));
        }
    }

    fn execute_btype(&mut self, instruction: u32) {
        let (_, rs1, rs2, imm, funct3) = decode_btype(instruction);
        let offset = sign_extend(imm, 13);

        let a = self.reg_read(rs1);
        let b = self.reg_read(rs2);
        let taken = match funct3 {
            0b000 => a == b,
            0b001 => a != b,
            0b100 => (a as i32) < (b as i32),
            0b101 => (a as i32) >= (b as i32),
            0b110 => a < b,
            0b111 => a >= b,
            _ => {
                self.new_exception(format!(
                    "Unsupported B-Type instruction exception: funct3={funct3}"
                ));
                return;
            }
        };
        if taken {
            self.pc = (self.pc as i32).wrapping_add(offset).wrapping_sub(4) as u32;
        }
    }

    fn execute_mem_itype(&mut self, instruction: u32) {
        let (_, rd, rs1, imm, funct3) = decode_itype(instruction);
        let addr = self.reg_read(rs1).wrapping_add(sign_extend(imm, 12) as u32);

        match funct3 {
            0b000 => {
                let b = self.mem_read_byte(addr) as u8;
                self.reg_write(rd, b as i8 as i32 as u32);
            }
            0b001 => {
                let h = self.mem_read_half(addr) as u16;
                self.reg_write(rd, h as i16 as i32 as u32);
            }
            0b010 => {
                let w = self.mem_read_word(addr, false);
                self.reg_write(rd, w);
            }
            0b100 => {
                let b = self.mem_read_byte(addr);
                self.reg_write(rd, b);
            }
            0b101 => {
                let h = self.mem_read_half(addr);
                self.reg_write(rd, h);
            }
            _ => {
                self.new_exception(format!(
                    "Unsupported Mem I-Type instruction exception: funct3={funct3}"
                ));
            }
        }
    }

    fn execute_itype(&mut self, instruction: u32) {
        let (opcode, rd, rs1, imm, funct3) = decode_itype(instruction);
        let simm = sign_extend(imm, 12);

        match funct3 {
            0b000 => {
                let v = (self.reg_read(rs1) as i32).wrapping_add(simm);
                self.reg_write(rd, v as u32);
            }
            0b010 => {
                let v = ((self.reg_read(rs1) as i32) < simm) as u32;
                self.reg_write(rd, v);
            }
            // sltiu compares against the raw 12-bit immediate
            0b011 => {
                let v = (self.reg_read(rs1) < imm) as u32;
                self.reg_write(rd, v);
            }
            0b100 => {
                let v = self.reg_read(rs1) ^ (simm as u32);
                self.reg_write(rd, v);
            }
            0b110 => {
                let v = self.reg_read(rs1) | (simm as u32);
                self.reg_write(rd, v);
            }
            0b111 => {
                let v = self.reg_read(rs1) & (simm as u32);
                self.reg_write(rd, v);
            }
            0b001 => {
                let v = self.reg_read(rs1) << (imm & 0b11111);
                self.reg_write(rd, v);
            }
            0b101 => {
                if imm >> 5 == 0b0000000 {
                    let v = self.reg_read(rs1) >> (imm & 0b11111);
                    self.reg_write(rd, v);
                } else if imm >> 5 == 0b0100000 {
                    let v = (self.reg_read(rs1) as i32) >> (imm & 0b11111);
                    self.reg_write(rd, v as u32);
                } else {
                    self.new_exception(format!(
                        "Unsupported I-Type instruction exception: op={opcode} funct3={funct3} imm={imm}"
                    ));
                }
            }
            _ => {
                self.new_exception(format!(
                    "Unsupported I-Type instruction exception: op={opcode} funct3={funct3}"
                ));
            }
        }
    }

    fn execute_rtype(&mut self, instruction: u32) {
        let (opcode, rd, rs1, rs2, funct7, funct3) = decode_rtype(instruction);

        if funct7 == 0b0000000 || funct7 == 0b0100000 {
            let a = self.reg_read(rs1);
            let b = self.reg_read(rs2);
            let v = match (funct3, funct7) {
                (0b000, 0b0000000) => a.wrapping_add(b),
                (0b000, 0b0100000) => a.wrapping_sub(b),
                (0b001, _) => a << (b & 0b11111),
                (0b010, _) => ((a as i32) < (b as i32)) as u32,
                (0b011, _) => (a < b) as u32,
                (0b100, _) => a ^ b,
                (0b101, 0b0000000) => a >> (b & 0b11111),
                (0b101, 0b0100000) => ((a as i32) >> (b & 0b11111)) as u32,
                (0b110, _) => a | b,
                (0b111, _) => a & b,
                _ => {
                    self.new_exception(format!(
                        "Unsupported R-Type instruction exception: op={opcode} funct3={funct3} funct7={funct7}"
                    ));
                    return;
                }
            };
            self.reg_write(rd, v);
        } else if funct7 == 0b0000001 {
            let a = self.reg_read(rs1);
            let b = self.reg_read(rs2);
            let v = match funct3 {
                0b000 => a.wrapping_mul(b),
                0b001 => ((a as i32 as i64).wrapping_mul(b as i32 as i64) >> 32) as u32,
                0b010 => ((a as i32 as i64).wrapping_mul(b as i64) >> 32) as u32,
                0b011 => (((a as u64).wrapping_mul(b as u64)) >> 32) as u32,
                0b100 => {
                    if b == 0 {
                        self.new_exception("divide by zero".to_string());
                        return;
                    }
                    (a as i32).wrapping_div(b as i32) as u32
                }
                0b101 => {
                    if b == 0 {
                        self.new_exception("divide by zero".to_string());
                        return;
                    }
                    a / b
                }
                // rem with a zero divisor yields the dividend, as the ISA
                // defines, and does not trap
                0b110 => {
                    if b == 0 {
                        a
                    } else {
                        (a as i32).wrapping_rem(b as i32) as u32
                    }
                }
                0b111 => {
                    if b == 0 {
                        a
                    } else {
                        a % b
                    }
                }
                _ => unreachable!(),
            };
            self.reg_write(rd, v);
        } else {
            self.new_exception(format!(
                "Unsupported R-Type instruction exception: op={opcode} funct3={funct3} funct7={funct7}"
            ));
        }
    }

    fn execute_stype(&mut self, instruction: u32) {
        let (opcode, rs1, rs2, imm, funct3) = decode_stype(instruction);
        let addr = self.reg_read(rs1).wrapping_add(sign_extend(imm, 12) as u32);
        let value = self.reg_read(rs2);

        match funct3 {
            0b000 => self.mem_write_byte(addr, value),
            0b001 => self.mem_write_half(addr, value),
            0b010 => self.mem_write_word(addr, value),
            _ => {
                self.new_exception(format!(
                    "Unsupported S-Type instruction exception: op={opcode} funct3={funct3}"
                ));
            }
        }
    }

    fn execute_env(&mut self, instruction: u32) {
        let (opcode, _, _, imm, funct3) = decode_itype(instruction);
        if funct3 != 0b000 {
            self.new_exception(format!(
                "Unsupported Env-Type instruction exception: op={opcode} funct3={funct3}"
            ));
            return;
        }

        if imm == 0 {
            self.execute_ecall();
        } else if imm == 1 {
            self.new_exception("EBREAK instruction exception".to_string());
        } else {
            self.new_exception(format!(
                "Unsupported Env-Type instruction exception: op={opcode} funct3={funct3}"
            ));
        }
    }

    fn execute_ecall(&mut self) {
        match self.registers[17] {
            // exit
            93 => {
                self.exit_code = self.registers[10] as i32;
                self.pc = EXIT_JUMP;
            }
            // sbrk: increment in a6, old break returned in a0
            214 => {
                self.registers[10] = self.heap_pointer;
                self.heap_pointer =
                    (self.heap_pointer as i32).wrapping_add(self.registers[16] as i32) as u32;
            }
            // write: a0 bytes from a1, stopping at NUL
            64 => {
                for i in 0..self.registers[10] {
                    if self.stdout_callback.is_none() {
                        break;
                    }
                    let b = self.mem_read_byte(self.registers[11].wrapping_add(i)) as u8;
                    if b == 0 {
                        break;
                    }
                    if let Some(cb) = self.stdout_callback.as_mut() {
                        cb(b);
                    }
                }
            }
            _ => {
                if self.os_entry == 0 {
                    self.new_exception(
                        "No ECALL handler registered. Perhaps the assignment file wasn't specified, or the editor is in the wrong folder?"
                            .to_string(),
                    );
                    return;
                }

                // trap to the OS with the register-preservation protocol
                self.user_global_pointer = self.registers[3];
                self.in_os_code = true;

                for i in 1..=30 {
                    self.register_preservation[i] = self.registers[i];
                }
                self.was_ecall = true;

                // push a0-a7, then a pointer to the saved block
                for i in 0..8 {
                    self.mem_write_word(self.registers[2], self.registers[10 + i]);
                    self.registers[2] = self.registers[2].wrapping_sub(4);
                }
                self.registers[10] = self.registers[2].wrapping_add(4);
                self.mem_write_word(self.registers[2], self.registers[2].wrapping_add(4));
                self.registers[2] = self.registers[2].wrapping_sub(40);

                self.registers[8] = self.registers[2];
                self.registers[1] = self.pc.wrapping_add(4);
                self.registers[3] = self.os_global_pointer;
                self.pc = self.os_entry;
            }
        }
    }
}
