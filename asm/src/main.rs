use std::io::Write;

use color_print::{cformat, cprintln};

use asm::{Diagnostic, Severity};

const HELP_TEMPLATE: &str = "\
{before-help}{bin} {version}
  {about}

{usage-heading}
{tab}{usage}

{all-args}{after-help}";

#[derive(Debug, clap::Parser)]
#[clap(version, about = "Assembler for the RV32IM ISA", help_template = HELP_TEMPLATE)]
struct Args {
    /// Input file
    #[clap(default_value = "main.s")]
    input: String,

    /// Output file
    #[clap(short, long, default_value = "main.bin")]
    output: String,

    /// Dump the assembled words
    #[clap(short, long)]
    dump: bool,

    /// Print diagnostics as JSON instead of human-readable text
    #[clap(long)]
    diagnostics_json: bool,
}

fn main() {
    use clap::Parser;

    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.input) {
        Ok(s) => s,
        Err(e) => {
            cprintln!("<red,bold>error</>: cannot open {}: {}", args.input, e);
            std::process::exit(1);
        }
    };

    let program = asm::assemble(&source);

    if args.diagnostics_json {
        println!("{}", serde_json::to_string_pretty(&program.diagnostics).unwrap());
    } else {
        for d in &program.diagnostics {
            print_diagnostic(&args.input, &source, d);
        }
    }

    let failed = program
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error);

    if args.dump {
        for (i, word) in program.text.iter().enumerate() {
            let line = program.address_to_line.get(&((i * 4) as u32));
            match line {
                Some(l) => println!("{:08X} | {:08X}  # line {}", i * 4, word, l + 1),
                None => println!("{:08X} | {:08X}", i * 4, word),
            }
        }
        for (i, word) in program.data.iter().enumerate() {
            println!("data+{:04X} | {:08X}", i * 4, word);
        }
    }

    if failed {
        cprintln!(
            "<red,bold>error</>: assembly failed with {} diagnostics",
            program.diagnostics.len()
        );
        std::process::exit(1);
    }

    let mut out = std::fs::File::create(&args.output)
        .unwrap_or_else(|e| panic!("{}", cformat!("<r,s>Failed to create file</> {}: {e}", args.output)));
    for word in program.text.iter().chain(program.data.iter()) {
        out.write_all(&word.to_le_bytes())
            .unwrap_or_else(|e| panic!("{}", cformat!("<r,s>Failed to write file</> {}: {e}", args.output)));
    }
    println!(
        "  > {} ({} text words, {} data words)",
        args.output,
        program.text.len(),
        program.data.len()
    );
}

fn print_diagnostic(file: &str, source: &str, d: &Diagnostic) {
    match d.severity {
        Severity::Error => cprintln!("<red,bold>error</>: {}", d.message),
        Severity::Warning => cprintln!("<yellow,bold>warning</>: {}", d.message),
        _ => cprintln!("<green,bold>note</>: {}", d.message),
    }
    let line_num = d.range.start.line + 1;
    cprintln!(
        "     <blue>--></> <underline>{}:{}:{}</>",
        file,
        line_num,
        d.range.start.character + 1
    );
    cprintln!("      <blue>|</>");
    let content = source.lines().nth(d.range.start.line).unwrap_or("");
    cprintln!(" <blue>{:>4} |</> {}", line_num, content);
    cprintln!("      <blue>|</>");
}
