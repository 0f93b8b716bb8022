//! Command-line entry point: reads one source file, JIT-compiles and runs
//! each top-level form in order, and prints the result of every
//! non-definition expression.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use wisp_compiler::lexer::{TokenKind, TokenStream};
use wisp_jit::Driver;

#[derive(Parser)]
#[command(name = "wisp", about = "Run a wisp source file")]
struct Args {
    /// Path to a wisp source file.
    source: std::path::PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match fs::read_to_string(&args.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("wisp: cannot read {}: {e}", args.source.display());
            return ExitCode::FAILURE;
        }
    };

    let mut driver = match Driver::new() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("wisp: failed to initialize the JIT: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut tokens = TokenStream::new(&source);
    loop {
        if tokens.peek().kind == TokenKind::Eof {
            break;
        }
        if let Err(e) = driver.handle_top_level(&mut tokens, &source) {
            eprintln!("wisp: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
