//! Repair the TLS segment of an ELF binary so bionic (and other picky loaders) accept it
//!
//! This tool can:
//! - Raise the TLS segment alignment to a minimum (64 for ELF64, 32 for ELF32 by default)
//! - Remove the TLS file offset skew by padding the file before the segment
//! - Report what it would do without writing anything (--check)
//!
//! Usage examples:
//!   fix-tls libfoo.so
//!   fix-tls --align 32 --alignment-only libbar.so
//!   fix-tls --check -vv executable

use std::env;
use std::fs;
use std::process;

use tlsfix::elf::header;
use tlsfix::options::{FixOptions, Repairs};
use tlsfix::session::{Commit, Session};

fn print_usage() {
    eprintln!("Usage: fix-tls [options] <elf-file>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --align <n>            Required TLS alignment (default: 64 for ELF64, 32 for ELF32)");
    eprintln!("  --alignment-only       Only raise the TLS alignment");
    eprintln!("  --skew-only            Only remove the TLS offset skew");
    eprintln!("  --check                Report what would change, do not write");
    eprintln!("  --output <file>        Write the result here instead of in place");
    eprintln!("  -v                     More logging, repeat for more");
}

fn fail(msg: &str) -> ! {
    eprintln!("Error: {}", msg);
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let mut options = FixOptions::new();
    let mut output_file: Option<String> = None;
    let mut input_file: Option<String> = None;
    let mut verbosity = 1;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--align" => {
                let Some(value) = args.get(i + 1) else {
                    fail("--align requires an argument");
                };
                match value.parse::<u64>() {
                    Ok(align) if align > 0 => options = options.with_alignment(align),
                    _ => fail(&format!("invalid alignment: {}", value)),
                }
                i += 2;
            }
            "--alignment-only" => {
                options = options.with_repairs(Repairs::AlignmentOnly);
                i += 1;
            }
            "--skew-only" => {
                options = options.with_repairs(Repairs::SkewOnly);
                i += 1;
            }
            "--check" => {
                options = options.with_dry_run(true);
                i += 1;
            }
            "--output" => {
                let Some(value) = args.get(i + 1) else {
                    fail("--output requires an argument");
                };
                output_file = Some(value.clone());
                i += 2;
            }
            "-h" | "--help" => {
                print_usage();
                return;
            }
            arg if arg.starts_with("-v") && arg[1..].chars().all(|c| c == 'v') => {
                verbosity += arg.len() - 1;
                i += 1;
            }
            arg => {
                if arg.starts_with("--") {
                    eprintln!("Error: Unknown option: {}", arg);
                    print_usage();
                    process::exit(1);
                }
                if input_file.is_some() {
                    fail("Multiple input files specified");
                }
                input_file = Some(arg.to_string());
                i += 1;
            }
        }
    }

    stderrlog::new()
        .module("tlsfix")
        .verbosity(verbosity)
        .init()
        .unwrap();

    let input_file = match input_file {
        Some(f) => f,
        None => {
            eprintln!("Error: No input file specified");
            print_usage();
            process::exit(1);
        }
    };

    let mut session = match Session::open(&input_file) {
        Ok(s) => s,
        Err(e) => fail(&format!("{}: {}", input_file, e)),
    };
    if let Some(output) = &output_file {
        session = session.with_output(output);
    }

    let identity = *session.image().identity();
    println!(
        "{}: {}, required TLS alignment {}",
        input_file,
        header::class_to_str(identity.class()),
        options.alignment_for(identity.container())
    );

    let report = match session.apply(&options) {
        Ok(r) => r,
        Err(e) => fail(&format!("{}: {}", input_file, e)),
    };
    println!("{}", report);

    if options.dry_run {
        if report.is_change() {
            println!("{} needs fixing (--check, nothing written)", input_file);
        }
        return;
    }

    match session.commit() {
        Ok(Commit::Written(path)) => {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            println!("Fixed TLS segment in {} ({} bytes)", path.display(), size);
        }
        Ok(Commit::Unchanged) => println!("{} left unchanged", input_file),
        Err(e) => fail(&format!("writing {}: {}", input_file, e)),
    }
}
