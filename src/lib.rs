pub mod ast;
pub mod bundle;
pub mod canvas;
pub mod codegen;
pub mod gate;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod symbols;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

use anyhow::Result;
use lexer::Lexer;
use parser::Parser as JsParser;
use std::path::{Path, PathBuf};

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let input = canonicalize_input(&args.input)?;
    let source = bundle::collect_source(&input)?;
    let output = resolve_output_path(&input, args.output.as_deref());
    let (program, symbols) = compile_front_end(&source)?;
    codegen::write_sb3(&program, &symbols, &output)
}

pub fn compile_source_to_sb3_bytes(source: &str) -> Result<Vec<u8>> {
    let (program, symbols) = compile_front_end(source)?;
    codegen::build_sb3_bytes(&program, &symbols)
}

/// The assembled `project.json` envelope without the surrounding
/// archive; this is what the test suite inspects.
pub fn compile_source_to_project(source: &str) -> Result<serde_json::Value> {
    let (program, symbols) = compile_front_end(source)?;
    codegen::build_project_json(&program, &symbols)
}

fn compile_front_end(source: &str) -> Result<(ast::Program, symbols::SymbolTable)> {
    let source = canvas::preprocess(source);
    let tokens = Lexer::new(&source).tokenize().map_err(|e| {
        anyhow::anyhow!(
            "Lex error: {} (line {}, column {})",
            e.message,
            e.pos.line,
            e.pos.column
        )
    })?;
    let mut parser = JsParser::new(tokens);
    let program = parser.parse_program().map_err(|e| {
        anyhow::anyhow!(
            "Parse error: {} (line {}, column {})",
            e.message,
            e.pos.line,
            e.pos.column
        )
    })?;
    gate::check_program(&program).map_err(|e| anyhow::anyhow!("{}", e))?;
    let symbols = symbols::analyze(&program);
    Ok((program, symbols))
}

fn resolve_output_path(input: &Path, output: Option<&Path>) -> PathBuf {
    match output {
        Some(path) => path.with_extension("sb3"),
        None => input.with_extension("sb3"),
    }
}

fn canonicalize_input(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Input not found: '{}'.",
            path.display()
        ));
    }
    Ok(path.canonicalize()?)
}
