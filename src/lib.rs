//! c0 Core: single-pass front end for the c0 teaching language.
//!
//! Source text is scanned into tokens, then one recursive-descent pass
//! parses, checks scopes and emits c0 stack-VM instructions with
//! backpatched jumps. The resulting [`Program`] can be written as `.s0`
//! assembly text or a `.o0` binary object, and executed by the bundled VM.
//!
//! - `scanner`: source text to tokens.
//! - `analyzer`: tokens to [`Program`], built on `cursor`, `scope`,
//!   `function` and `instruction`.
//! - `object` / `assembly`: serialized forms.
//! - `vm`: reference interpreter.

pub mod analyzer;
pub mod assembly;
pub mod config;
pub mod cursor;
pub mod error;
pub mod function;
pub mod instruction;
pub mod object;
pub mod program;
pub mod scanner;
pub mod scope;
pub mod token;
pub mod vm;

pub use analyzer::{analyze, Analyzer};
pub use error::{CompilationError, ErrorCode};
pub use object::{ObjectError, ObjectModule};
pub use program::Program;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Compile(#[from] CompilationError),
    #[error(transparent)]
    Object(#[from] ObjectError),
}

pub fn compile_source(src: &str) -> Result<Program, CompilationError> {
    analyze(scanner::scan(src)?)
}

pub fn compile_to_module(src: &str) -> Result<ObjectModule, BuildError> {
    let program = compile_source(src)?;
    Ok(ObjectModule::from_program(&program)?)
}

pub fn compile_to_assembly(src: &str) -> Result<String, BuildError> {
    Ok(assembly::render(&compile_to_module(src)?))
}

pub fn compile_to_object(src: &str) -> Result<Vec<u8>, BuildError> {
    Ok(object::encode(&compile_to_module(src)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_errors_surface_through_compile_source() {
        let err = compile_source("void main() { int x = 09; }").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn build_error_keeps_compilation_position() {
        let err = compile_to_assembly("void main() { return 1; }").expect_err("must fail");
        match err {
            BuildError::Compile(e) => {
                assert_eq!(e.code, ErrorCode::IncorrectReturnType);
                assert_eq!((e.line, e.column), (1, 22));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
