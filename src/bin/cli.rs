// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Script CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use polyframe_script::ast::{print_program, ExprKind, UnaryOp};
use polyframe_script::config::EngineConfig;
use polyframe_script::io::{export_stl, parse_expression, tokenize};
use polyframe_script::{
    parse_scad, run_program, GeometryProgram, MeshBackend, RecordingBackend, RunOptions, Value,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polyframe-script")]
#[command(about = "Polyframe Script - OpenSCAD-style language front-end", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./polyframe.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Set a special variable, e.g. -D '$fn=64'
    #[arg(short = 'D', global = true, value_name = "$NAME=VALUE")]
    define: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script and export the preview mesh as STL
    Render {
        /// Input script
        input: PathBuf,

        /// Output STL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Evaluate a script and print echoes and backend calls
    Check {
        /// Input script
        input: PathBuf,
    },

    /// Parse a script and print the AST
    Parse {
        /// Input script
        input: PathBuf,

        /// Print JSON instead of formatted source
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Render { input, output } => render_command(&cli, input, output),
        Commands::Check { input } => check_command(&cli, input),
        Commands::Parse { input, json } => parse_command(input, *json),
        Commands::Version => {
            println!("Polyframe Script v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_source(input: &Path) -> Result<String> {
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))
}

/// Run options from the configuration file, environment and `-D` flags,
/// searching libraries next to the input first
fn run_options(cli: &Cli, input: &Path) -> Result<RunOptions> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = EngineConfig::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => EngineConfig::load()?,
    };

    let mut options = config.run_options()?;
    if let Some(dir) = input.parent() {
        options = options.with_search_dir(dir);
    }
    for define in &cli.define {
        let (name, value) = parse_define(define)?;
        options = options.with_special_var(name, value);
    }
    Ok(options)
}

fn parse_define(define: &str) -> Result<(String, Value<'static>)> {
    let Some((name, source)) = define.split_once('=') else {
        bail!("Expected $NAME=VALUE, got '{}'", define);
    };
    let name = name.trim();
    if !name.starts_with('$') || name.len() < 2 {
        bail!("Only special variables can be set with -D, got '{}'", name);
    }
    let tokens = tokenize(source).with_context(|| format!("Invalid value for {}", name))?;
    let expr = parse_expression(&tokens).with_context(|| format!("Invalid value for {}", name))?;
    match literal(&expr.kind) {
        Some(value) => Ok((name.to_string(), value)),
        None => bail!("Value for {} must be a literal", name),
    }
}

fn literal(kind: &ExprKind) -> Option<Value<'static>> {
    Some(match kind {
        ExprKind::Number(n) => Value::Number(*n),
        ExprKind::String(s) => Value::String(s.clone()),
        ExprKind::Bool(b) => Value::Bool(*b),
        ExprKind::Undef => Value::Undefined,
        ExprKind::Unary {
            op: UnaryOp::Negate,
            operand,
        } => match &operand.kind {
            ExprKind::Number(n) => Value::Number(-n),
            _ => return None,
        },
        ExprKind::Vector(items) => Value::Vector(
            items
                .iter()
                .map(|item| literal(&item.kind))
                .collect::<Option<_>>()?,
        ),
        _ => return None,
    })
}

fn render_command(cli: &Cli, input: &Path, output: &Path) -> Result<()> {
    let source = read_source(input)?;
    let options = run_options(cli, input)?;
    let base_dir = input.parent().unwrap_or_else(|| Path::new("."));
    let mut backend = MeshBackend::with_base_dir(base_dir);

    let start = std::time::Instant::now();
    let program = run_program(&source, &mut backend, &options)
        .with_context(|| format!("Failed to evaluate {}", input.display()))?;
    let render_time = start.elapsed();

    print_echoes(&program);

    let handles: Vec<_> = program
        .roots
        .iter()
        .filter(|g| !g.is_background())
        .map(|g| g.handle)
        .collect();
    let mesh = backend.combined_mesh(&handles);
    if mesh.is_empty() {
        eprintln!("{} {} produced no solid geometry", "Warning:".yellow(), input.display());
    }
    export_stl(&mesh, output)?;

    if cli.verbose {
        println!("Rendered in {:.2?}", render_time);
        println!("Vertices: {}", mesh.vertex_count());
        println!("Triangles: {}", mesh.triangle_count());
        if !mesh.is_empty() {
            let size = mesh.bounding_box().size();
            println!("Size: {:.3} x {:.3} x {:.3}", size.x, size.y, size.z);
        }
    }
    println!(
        "{} {} -> {}",
        "✓".green(),
        input.display(),
        output.display()
    );
    Ok(())
}

fn check_command(cli: &Cli, input: &Path) -> Result<()> {
    let source = read_source(input)?;
    let options = run_options(cli, input)?;
    let mut backend = RecordingBackend::new();

    let program = match run_program(&source, &mut backend, &options) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };

    print_echoes(&program);
    for call in backend.calls() {
        println!("  {}", call);
    }
    println!(
        "{} {} root(s), {} backend call(s)",
        "✓".green(),
        program.roots.len(),
        backend.calls().len()
    );
    Ok(())
}

fn parse_command(input: &Path, json: bool) -> Result<()> {
    let source = read_source(input)?;
    let stmts = parse_scad(&source).with_context(|| format!("Failed to parse {}", input.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stmts)?);
    } else {
        print!("{}", print_program(&stmts));
    }
    Ok(())
}

fn print_echoes(program: &GeometryProgram) {
    for echo in &program.echoes {
        println!("{} {}", "ECHO:".bright_blue(), echo);
    }
}
