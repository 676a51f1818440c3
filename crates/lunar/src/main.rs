use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lunar_compiler::{disasm, lexer, CompileError};
use tracing::debug;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Lua source file, or '-' to read stdin
    file: PathBuf,

    /// chunk name used in listings and error messages
    #[arg(long)]
    name: Option<String>,

    /// what to print
    #[arg(long, value_enum, default_value_t = Emit::Bytecode)]
    emit: Emit,

    /// raise log verbosity (repeatable)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
    Bytecode,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("lunar: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let (source, default_name) = read_source(&cli.file)?;
    let chunk = cli.name.clone().unwrap_or(default_name);
    let source = skip_shebang(&source);
    debug!(chunk = %chunk, bytes = source.len(), emit = ?cli.emit, "loaded source");

    let report = |err: CompileError| anyhow::anyhow!("{chunk}:{err}");
    match cli.emit {
        Emit::Tokens => {
            let tokens = lexer::tokenize(source).map_err(|e| report(e.into()))?;
            for token in tokens {
                println!("{}\t{:?}\t{}", token.line, token.kind, token.text());
            }
        }
        Emit::Ast => {
            let block = lunar_compiler::parse(source).map_err(report)?;
            println!("{block:#?}");
        }
        Emit::Bytecode => {
            let proto = lunar_compiler::compile(source, &chunk).map_err(report)?;
            print!("{}", disasm::dump(&proto));
        }
    }
    Ok(())
}

/// Read the whole input and pick a default chunk name for it.
fn read_source(file: &Path) -> Result<(String, String)> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("cannot read stdin")?;
        return Ok((source, "stdin".to_string()));
    }
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("cannot open {}", file.display()))?;
    Ok((source, file.display().to_string()))
}

/// Blank out a leading `#` line, keeping its newline so line numbers hold.
fn skip_shebang(source: &str) -> &str {
    if !source.starts_with('#') {
        return source;
    }
    match source.find('\n') {
        Some(pos) => &source[pos..],
        None => "",
    }
}
