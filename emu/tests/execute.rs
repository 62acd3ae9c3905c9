use std::cell::RefCell;
use std::rc::Rc;

use emu::{Emulator, EmulatorConfig, MemoryImage};

fn load(source: &str) -> (MemoryImage, u32) {
    let program = asm::assemble(source);
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    let mut memory = MemoryImage::new();
    for (i, word) in program.text.iter().enumerate() {
        memory.write_word((i * 4) as u32, *word);
    }
    let global_data = (program.text.len() * 4) as u32;
    for (i, word) in program.data.iter().enumerate() {
        memory.write_word(global_data + (i * 4) as u32, *word);
    }
    (memory, global_data)
}

fn run(source: &str) -> Emulator {
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        os_global_pointer: global_data,
        memory,
        runtime_limit: 10_000,
        ..Default::default()
    });
    emulator.emulate(0);
    emulator
}

#[test]
fn lui_addi_carries_borrow() {
    let emulator = run(
        ".text
lui x5, 0x12345
addi x5, x5, -1
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.registers()[5], 0x12344FFF);
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
}

#[test]
fn returning_through_ra_halts() {
    let emulator = run(".text\naddi x5, x0, 7\njalr x0, ra, 0\n");
    assert_eq!(emulator.registers()[5], 7);
    assert_eq!(emulator.dynamic_instruction_count(), 2);
    assert!(emulator.errors().is_empty());
}

#[test]
fn exit_syscall_sets_exit_code() {
    let emulator = run(
        ".text
addi x10, x0, 42
addi x17, x0, 93
ecall
",
    );
    assert_eq!(emulator.exit_code(), 42);
    assert!(emulator.errors().is_empty());
}

#[test]
fn branch_taken_and_not_taken() {
    let emulator = run(
        ".text
addi x5, x0, 1
addi x6, x0, 1
beq x5, x6, equal
addi x7, x0, 99
equal: addi x8, x0, 5
bne x5, x6, differ
addi x9, x0, 6
differ: jalr x0, ra, 0
",
    );
    assert_eq!(emulator.registers()[7], 0, "beq must skip the x7 write");
    assert_eq!(emulator.registers()[8], 5);
    assert_eq!(emulator.registers()[9], 6, "bne must fall through");
}

#[test]
fn rv32m_arithmetic() {
    let emulator = run(
        ".text
addi x5, x0, -6
addi x6, x0, 4
mul x7, x5, x6
div x8, x5, x6
rem x9, x5, x6
divu x10, x6, x6
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.registers()[7] as i32, -24);
    assert_eq!(emulator.registers()[8] as i32, -1);
    assert_eq!(emulator.registers()[9] as i32, -2);
    assert_eq!(emulator.registers()[10], 1);
    assert!(emulator.errors().is_empty());
}

#[test]
fn mulh_uses_full_product() {
    let emulator = run(
        ".text
lui x5, 0x40000
mul x6, x5, x5
mulh x7, x5, x5
mulhu x8, x5, x5
jalr x0, ra, 0
",
    );
    // 0x40000000^2 = 2^60
    assert_eq!(emulator.registers()[6], 0);
    assert_eq!(emulator.registers()[7], 0x10000000);
    assert_eq!(emulator.registers()[8], 0x10000000);
}

#[test]
fn divide_by_zero_traps() {
    let emulator = run(
        ".text
addi x5, x0, 10
addi x6, x0, 0
div x7, x5, x6
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("divide by zero"));
    // the destination write is skipped
    assert_eq!(emulator.registers()[7], 0);
}

#[test]
fn rem_by_zero_does_not_trap() {
    let emulator = run(
        ".text
addi x5, x0, 10
addi x6, x0, 0
rem x7, x5, x6
remu x8, x5, x6
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.registers()[7], 10);
    assert_eq!(emulator.registers()[8], 10);
}

#[test]
fn shifts_and_compares() {
    let emulator = run(
        ".text
addi x5, x0, -8
srai x6, x5, 1
srli x7, x5, 28
slti x8, x5, 0
sltiu x9, x5, 1
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.registers()[6] as i32, -4);
    assert_eq!(emulator.registers()[7], 0xF);
    assert_eq!(emulator.registers()[8], 1);
    assert_eq!(emulator.registers()[9], 0);
}

#[test]
fn loads_sign_and_zero_extend() {
    let emulator = run(
        ".data
Bytes: .word 0x80FF
.text
lb x5, Bytes(gp)
lbu x6, Bytes(gp)
lh x7, Bytes(gp)
lhu x8, Bytes(gp)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.registers()[5], 0xFFFFFFFF);
    assert_eq!(emulator.registers()[6], 0xFF);
    assert_eq!(emulator.registers()[7], 0xFFFF80FF);
    assert_eq!(emulator.registers()[8], 0x80FF);
}

#[test]
fn call_stack_balances() {
    let emulator = run(
        ".text
jal x1, helper
addi x6, x0, 2
addi x10, x0, 0
addi x17, x0, 93
ecall
helper: addi x5, x0, 1
jalr x0, x1, 0
",
    );
    assert_eq!(emulator.registers()[5], 1);
    assert_eq!(emulator.registers()[6], 2);
    assert!(emulator.call_stack().is_empty());
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
}

#[test]
fn sbrk_advances_heap() {
    let emulator = run(
        ".text
addi x16, x0, 16
addi x17, x0, 214
ecall
ecall
jalr x0, ra, 0
",
    );
    // second call returns the bumped break
    assert_eq!(emulator.registers()[10], 0x1000_0010);
    assert!(emulator.errors().is_empty());
}

#[test]
fn write_syscall_streams_until_nul() {
    let source = ".data
Msg: .ascii \"Hi!\"
.text
addi x10, x0, 8
addi x11, x3, 0
addi x17, x0, 64
ecall
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let output = Rc::new(RefCell::new(Vec::new()));
    let sink = output.clone();
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        os_global_pointer: global_data,
        memory,
        runtime_limit: 10_000,
        stdout_callback: Some(Box::new(move |b| sink.borrow_mut().push(b))),
        ..Default::default()
    });
    emulator.emulate(0);
    assert_eq!(&*output.borrow(), b"Hi!", "stream stops at the NUL terminator");
}

#[test]
fn ecall_without_handler_traps() {
    let emulator = run(
        ".text
addi x17, x0, 5
ecall
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("No ECALL handler"));
}

#[test]
fn ebreak_traps() {
    let emulator = run(".text\nebreak\njalr x0, ra, 0\n");
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("EBREAK"));
}

#[test]
fn uninitialized_register_read_traps() {
    let emulator = run(".text\nadd x5, x20, x21\njalr x0, ra, 0\n");
    assert_eq!(emulator.errors().len(), 2);
    assert!(emulator.errors()[0].message.contains("before initialized"));
}

#[test]
fn writing_x0_traps_and_is_ignored() {
    // the x0 spelling slips past the special-register list, which matches
    // ABI names only
    let emulator = run(".text\naddi x0, x0, 5\njalr x0, ra, 0\n");
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("read-only register x0"));
    assert_eq!(emulator.registers()[0], 0);
}

#[test]
fn runtime_limit_stops_infinite_loop() {
    let source = ".text\nloop: jal x0, loop\n";
    let (memory, global_data) = load(source);
    let output = Rc::new(RefCell::new(Vec::new()));
    let sink = output.clone();
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        os_global_pointer: global_data,
        memory,
        runtime_limit: 100,
        stdout_callback: Some(Box::new(move |b| sink.borrow_mut().push(b))),
        ..Default::default()
    });
    emulator.emulate(0);
    assert_eq!(emulator.dynamic_instruction_count(), 100);
    let text = String::from_utf8(output.borrow().clone()).unwrap();
    assert!(text.contains("Infinite Loop?"), "{text}");
}

#[test]
fn interrupt_suspends_and_resumes_the_frame() {
    let source = ".data
Out: .word 0
.text
lui x7, 0x80003
lw x8, 28(x7)
lw x9, Out(gp)
add x10, x8, x9
sw x10, Out(gp)
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        os_global_pointer: global_data,
        memory,
        runtime_limit: 10_000,
        // the whole program is hosted code for this scenario
        profile_ignore_range_start: 0,
        profile_ignore_range_end: 0x100,
        ..Default::default()
    });
    emulator.interrupt(emu::Interrupt::new(7, vec![11, 22]));
    emulator.emulate(0);

    // first pass sees id 7 and resumes; the restored pass sees id 0
    assert_eq!(emulator.memory().read_word(global_data), Some(7));
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.dynamic_instruction_count(), 0, "hosted code is free");
}

#[test]
fn profile_ignore_range_is_transparent() {
    let source = ".text
addi x5, x0, 1
addi x6, x0, 2
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut counted = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory: memory.clone(),
        runtime_limit: 1_000,
        ..Default::default()
    });
    counted.emulate(0);

    let mut ignored = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: 1_000,
        profile_ignore_range_start: 0,
        profile_ignore_range_end: 0x1000,
        ..Default::default()
    });
    ignored.emulate(0);

    assert_eq!(counted.dynamic_instruction_count(), 3);
    assert_eq!(ignored.dynamic_instruction_count(), 0);
    assert_eq!(
        counted.total_instructions_executed(),
        ignored.total_instructions_executed()
    );
}

#[test]
fn terminate_stops_the_loop() {
    let source = ".text\nloop: jal x0, loop\n";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: u32::MAX,
        ..Default::default()
    });
    emulator.terminate();
    emulator.emulate(0);
    assert_eq!(emulator.total_instructions_executed(), 0);
}
