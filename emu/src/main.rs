use std::io::Write;

use color_print::cprintln;

use emu::{Emulator, EmulatorConfig, MemoryImage};

const HELP_TEMPLATE: &str = "\
{before-help}{bin} {version}
  {about}

{usage-heading}
{tab}{usage}

{all-args}{after-help}";

#[derive(Debug, clap::Parser)]
#[clap(version, about = "Emulator for the RV32IM ISA", help_template = HELP_TEMPLATE)]
struct Args {
    /// Program image: assembly source (.s) or raw little-endian words
    input: String,

    /// Load/entry address
    #[clap(short, long, default_value_t = 0)]
    entry: u32,

    /// Dynamic instruction limit
    #[clap(short, long, default_value_t = 1_000_000)]
    limit: u32,

    /// Random seed (0 picks one from the clock)
    #[clap(short, long, default_value_t = 0)]
    seed: u32,

    /// Stack start address
    #[clap(long = "stack", default_value_t = 0x7FFF_FFF0)]
    stack: u32,
}

fn main() {
    use clap::Parser;

    let args = Args::parse();

    let mut memory = MemoryImage::new();
    let global_data;

    if args.input.ends_with(".s") || args.input.ends_with(".asm") {
        let source = match std::fs::read_to_string(&args.input) {
            Ok(s) => s,
            Err(e) => {
                cprintln!("<red,bold>error</>: cannot open {}: {}", args.input, e);
                std::process::exit(1);
            }
        };
        let program = asm::assemble(&source);
        if !program.diagnostics.is_empty() {
            for d in &program.diagnostics {
                cprintln!(
                    "<red,bold>{}:{}:{}</>: {}",
                    args.input,
                    d.range.start.line + 1,
                    d.range.start.character + 1,
                    d.message
                );
            }
            std::process::exit(1);
        }
        for (i, word) in program.text.iter().enumerate() {
            memory.write_word(args.entry + (i as u32) * 4, *word);
        }
        // the data section lands right after the text section
        global_data = args.entry + (program.text.len() as u32) * 4;
        for (i, word) in program.data.iter().enumerate() {
            memory.write_word(global_data + (i as u32) * 4, *word);
        }
    } else {
        let bytes = match std::fs::read(&args.input) {
            Ok(b) => b,
            Err(e) => {
                cprintln!("<red,bold>error</>: cannot open {}: {}", args.input, e);
                std::process::exit(1);
            }
        };
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            memory.write_word(args.entry + (i as u32) * 4, u32::from_le_bytes(word));
        }
        global_data = args.entry + bytes.len() as u32;
    }

    let config = EmulatorConfig {
        stack_start_address: args.stack,
        global_data_address: global_data,
        os_global_pointer: global_data,
        memory,
        runtime_limit: args.limit,
        random_seed: args.seed,
        runtime_error_callback: Some(Box::new(|e| {
            cprintln!("<red,bold>runtime exception</>: {}", e);
        })),
        stdout_callback: Some(Box::new(|b| {
            let mut out = std::io::stdout();
            let _ = out.write_all(&[b]);
            let _ = out.flush();
        })),
        ..Default::default()
    };

    let mut emulator = Emulator::new(config);
    emulator.emulate(args.entry);

    println!();
    cprintln!(
        "exit code <bold>{}</>, <bold>{}</> instructions (<bold>{}</> counted)",
        emulator.exit_code(),
        emulator.total_instructions_executed(),
        emulator.dynamic_instruction_count()
    );
    if !emulator.errors().is_empty() {
        cprintln!("<yellow,bold>{} runtime exception(s)</>", emulator.errors().len());
        std::process::exit(2);
    }
}
