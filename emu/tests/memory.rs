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
fn uninitialized_read_traps() {
    let emulator = run(
        ".text
lui x5, 0x10000
lw x6, 0(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0]
        .message
        .contains("Memory accessed before initialized"));
    assert_eq!(emulator.registers()[6], 0);
}

#[test]
fn unaligned_word_access_traps() {
    let emulator = run(
        ".text
addi x5, x0, 2
lw x6, 0(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("not aligned"));
}

#[test]
fn unaligned_half_access_traps() {
    let emulator = run(
        ".text
addi x5, x0, 1
lh x6, 0(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("halfword"));
}

#[test]
fn sub_word_stores_merge() {
    let emulator = run(
        ".data
Word: .word 0x11223344
.text
addi x5, x0, 0xAB
sb x5, Word(gp)
lw x6, Word(gp)
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.registers()[6], 0x112233AB);
}

#[test]
fn stores_initialize_for_later_reads() {
    let emulator = run(
        ".text
lui x5, 0x10000
addi x6, x0, 7
sw x6, 0(x5)
lw x7, 0(x5)
lb x8, 0(x5)
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.registers()[7], 7);
    assert_eq!(emulator.registers()[8], 7);
}

#[test]
fn mem_usage_counts_first_writes_only() {
    let emulator = run(
        ".text
lui x5, 0x10000
addi x6, x0, 7
sw x6, 0(x5)
sw x6, 0(x5)
sw x6, 4(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.memory_usage(), 2);
}

#[test]
fn mem_usage_ignores_hosted_writes() {
    let source = ".text
lui x5, 0x10000
addi x6, x0, 7
sw x6, 0(x5)
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: 1_000,
        profile_ignore_range_start: 0,
        profile_ignore_range_end: 0x1000,
        ..Default::default()
    });
    emulator.emulate(0);
    assert_eq!(emulator.memory_usage(), 0);
}

#[test]
fn reserved_window_never_pages() {
    // a write into the reserved-but-unmapped region faults instead of
    // allocating a page
    let emulator = run(
        ".text
lui x5, 0x80000
addi x6, x0, 1
sw x6, 0(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("Segmentation fault"));
    assert!(emulator.errors()[0].message.contains("0x80000000"));
}

#[test]
fn stdout_pipe_reads_fault() {
    let emulator = run(
        ".text
lui x5, 0x80003
lw x6, 4(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("0x80003004"));
}

#[test]
fn random_seed_is_readable() {
    let source = ".text
lui x5, 0x80003
lw x6, 20(x5)
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: 1_000,
        random_seed: 0x1234,
        ..Default::default()
    });
    emulator.emulate(0);
    assert!(emulator.errors().is_empty());
    assert_eq!(emulator.registers()[6], 0x1234);
}

#[test]
fn correctness_sink_rejects_user_writes() {
    let emulator = run(
        ".text
lui x5, 0x80003
addi x6, x0, 1
sw x6, 24(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("0x80003018"));
    assert_eq!(emulator.solution_validity(), 0);
}

#[test]
fn correctness_sink_accepts_hosted_writes() {
    let source = ".text
lui x5, 0x80003
addi x6, x0, 1
sw x6, 24(x5)
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: 1_000,
        profile_ignore_range_start: 0,
        profile_ignore_range_end: 0x1000,
        ..Default::default()
    });
    emulator.emulate(0);
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.solution_validity(), 1);
}

#[test]
fn framebuffer_write_marks_one_dirty_region() {
    let emulator = run(
        ".text
lui x5, 0x80003
addi x6, x0, 32
sw x6, 8(x5)
sw x6, 12(x5)
lui x7, 0x80010
addi x8, x0, 0xAA
sw x8, 0(x7)
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());

    let display = emulator.display();
    let updates = display.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!((updates[0].region_x, updates[0].region_y), (0, 0));
    assert_eq!(updates[0].data[0], 0xAA);

    // the poll clears the dirty bitmap
    assert!(display.updates().is_empty());
}

#[test]
fn shape_params_read_back() {
    let emulator = run(
        ".text
lui x5, 0x80003
addi x6, x0, 9
sw x6, -16(x5)
lw x7, -16(x5)
lw x8, -12(x5)
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());
    assert_eq!(emulator.registers()[7], 9);
    assert_eq!(emulator.registers()[8], 0, "untouched parameters read as zero");
}

#[test]
fn draw_color_register_is_write_only() {
    let emulator = run(
        ".text
lui x5, 0x80003
lw x6, -20(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("0x80002FEC"));
}

#[test]
fn rectangle_draw_fills_pixels() {
    let emulator = run(
        ".text
lui x5, 0x80003
addi x6, x0, 32
sw x6, 8(x5)
sw x6, 12(x5)
addi x8, x0, 2
sw x8, -16(x5)
sw x8, -12(x5)
sw x8, -8(x5)
sw x8, -4(x5)
addi x9, x0, 0x7F
sw x9, -20(x5)
jalr x0, ra, 0
",
    );
    assert!(emulator.errors().is_empty(), "{:?}", emulator.errors());

    // a 2x2 fill at (2, 2) with color 0x7F
    let display = emulator.display();
    let screen = display.entire_screen();
    let region0 = screen
        .iter()
        .find(|u| u.region_x == 0 && u.region_y == 0)
        .expect("region (0, 0)");
    assert_eq!(region0.data[2 * 16 + 2], 0x7F);
    assert_eq!(region0.data[3 * 16 + 3], 0x7F);
    assert_eq!(region0.data[4 * 16 + 4], 0);
    assert_eq!(region0.data[1 * 16 + 1], 0);
}

#[test]
fn interrupt_data_is_readable_while_active() {
    let source = ".data
Out: .word 0
.text
lui x5, 0x80003
lw x6, 0x020(x5)
lw x7, Out(gp)
add x8, x6, x7
sw x8, Out(gp)
jalr x0, ra, 0
";
    let (memory, global_data) = load(source);
    let mut emulator = Emulator::new(EmulatorConfig {
        global_data_address: global_data,
        memory,
        runtime_limit: 10_000,
        profile_ignore_range_start: 0,
        profile_ignore_range_end: 0x1000,
        ..Default::default()
    });
    emulator.interrupt(emu::Interrupt::new(3, vec![55]));
    emulator.emulate(0);
    // 55 from the live pass, 0 from the restored pass
    assert_eq!(emulator.memory().read_word(global_data), Some(55));
}

#[test]
fn interrupt_data_reads_fault_when_idle() {
    let emulator = run(
        ".text
lui x5, 0x80003
lw x6, 0x020(x5)
jalr x0, ra, 0
",
    );
    assert_eq!(emulator.errors().len(), 1);
    assert!(emulator.errors()[0].message.contains("0x80003020"));
}
