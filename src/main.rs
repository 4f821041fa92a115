//! BSQ Compiler CLI
//!
//! The `bsqc` command compiles one BSQ source file to LLVM IR. It prints a
//! boolean success indicator and always exits 0; diagnostics go to stderr.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bsqc")]
#[command(version = bsq::VERSION)]
#[command(about = "The BSQ compiler", long_about = None)]
struct Cli {
    /// Source file to compile
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Emit tokens (for debugging)
    #[arg(long)]
    emit_tokens: bool,

    /// Emit AST (for debugging)
    #[arg(long)]
    emit_ast: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.emit_tokens || cli.emit_ast {
        match fs::read_to_string(&cli.input) {
            Ok(source) => {
                if cli.emit_tokens {
                    emit_tokens(&source);
                }
                if cli.emit_ast {
                    emit_ast(&source, &cli.input);
                }
            }
            Err(e) => eprintln!("failed to read {}: {}", cli.input.display(), e),
        }
    }

    match bsq::compile(&cli.input) {
        Ok(output) => {
            eprintln!("wrote {}", output.display());
            println!("true");
        }
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            println!("false");
        }
    }
}

fn emit_tokens(source: &str) {
    let (tokens, errors) = bsq::lexer::lex(source);
    for token in &tokens {
        println!(
            "{:>4}..{:<4} {:10} {:?}",
            token.span.start,
            token.span.end,
            format!("{:?}", token.kind),
            token.text(source)
        );
    }
    for error in errors {
        eprintln!("lexer error: {}", error);
    }
}

fn emit_ast(source: &str, input: &std::path::Path) {
    match bsq::parser::parse(source, &input.to_string_lossy()) {
        Ok(program) => println!("{:#?}", program),
        Err(error) => eprintln!("syntax error: {}", error),
    }
}
