//! Compilation driver
//!
//! Ties the pipeline together: read the source, run the front-end, lower to
//! an LLVM module, link it with the pre-built runtime IR found next to the
//! compiler binary, verify the linked module and print it to a `.ll` file
//! alongside the source.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use miette::Diagnostic;
use thiserror::Error;

use crate::codegen::{CodegenError, IrGenerator};
use crate::parser::{self, ParseError};
use crate::typeck::{self, TypeError};

/// Name of the runtime IR file expected next to the compiler binary
pub const RUNTIME_LIBRARY: &str = "bsq_lib.ll";

/// Any failure of the compilation pipeline
#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),

    #[error("type check error: {0}")]
    Type(#[from] TypeError),

    #[error("code generation error: {0}")]
    Codegen(#[from] CodegenError),

    #[error("llvm error: {0}")]
    Llvm(String),
}

/// Result of the compilation pipeline
pub type CompileResult<T> = Result<T, CompileError>;

/// Compile one source file; returns the path of the written `.ll` module
pub fn compile(source: &Path) -> CompileResult<PathBuf> {
    let context = Context::create();

    let library = load_runtime_library(&context)?;
    let program_module = build_program_module(&context, source)?;

    let output = source.with_extension("ll");
    let linked = context.create_module(&output.to_string_lossy());
    linked
        .link_in_module(program_module)
        .map_err(|e| CompileError::Llvm(e.to_string()))?;
    linked
        .link_in_module(library)
        .map_err(|e| CompileError::Llvm(e.to_string()))?;

    linked
        .verify()
        .map_err(|e| CompileError::Llvm(e.to_string()))?;
    linked
        .print_to_file(&output)
        .map_err(|e| CompileError::Llvm(e.to_string()))?;

    Ok(output)
}

/// Run the front-end and the IR generator on one source file
pub fn build_program_module<'ctx>(
    context: &'ctx Context,
    source: &Path,
) -> CompileResult<Module<'ctx>> {
    let text = fs::read_to_string(source)?;
    let mut program = parser::parse(&text, &source.to_string_lossy())?;
    typeck::check(&mut program)?;
    let module = IrGenerator::new(context, &program).emit()?;
    Ok(module)
}

/// Parse the pre-built runtime IR shipped next to the binary
fn load_runtime_library(context: &Context) -> CompileResult<Module<'_>> {
    let path = runtime_library_path()?;
    let buffer =
        MemoryBuffer::create_from_file(&path).map_err(|e| CompileError::Llvm(e.to_string()))?;
    context
        .create_module_from_ir(buffer)
        .map_err(|e| CompileError::Llvm(e.to_string()))
}

fn runtime_library_path() -> CompileResult<PathBuf> {
    let exe = env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(RUNTIME_LIBRARY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_replaces_the_extension() {
        assert_eq!(
            Path::new("/tmp/demo.bas").with_extension("ll"),
            Path::new("/tmp/demo.ll")
        );
    }

    #[test]
    fn test_error_messages_carry_the_stage_prefix() {
        let parse_error: CompileError = ParseError::UndefinedVariable("X".into()).into();
        assert_eq!(parse_error.to_string(), "syntax error: X — variable not defined");

        let llvm_error = CompileError::Llvm("broken module".into());
        assert_eq!(llvm_error.to_string(), "llvm error: broken module");
    }
}
