mod render;

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pl2_core::config::DEFAULT_FRAGMENT_CAPACITY;
use pl2_core::grammar::dump::ProgramDump;
use pl2_core::{
    Engine, LoaderConfig, NativeLoader, ParseConfig, Program, parse_with_config, to_text,
};
use pl2_diagnostics::{Diagnostic, ErrorCode};
use tracing_subscriber::EnvFilter;

use crate::render::{Envelope, Format, has_errors, print_summary, render_diagnostics_pretty};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "PL2_LOG";

// ── CLI definition ──────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pl2",
    version,
    about = "pl2: run line-oriented command programs against loadable language backends"
)]
struct Cli {
    /// Output mode: "pretty" for coloured terminal output, "json" for
    /// machine-readable JSON. Defaults to "pretty" when stdout is a TTY,
    /// "json" otherwise.
    #[arg(long, global = true, value_parser = ["pretty", "json"])]
    output: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Parse a program and run it.
    Run {
        file: String,
        /// Directory searched for language libraries after the current
        /// directory. Overrides PL2_HOME.
        #[arg(long)]
        home: Option<PathBuf>,
        /// Do not look for language libraries in the current directory.
        #[arg(long)]
        no_cwd: bool,
        /// Parts a single command may hold, plus one.
        #[arg(long, default_value_t = DEFAULT_FRAGMENT_CAPACITY, value_parser = parse_capacity)]
        fragment_capacity: usize,
    },

    /// Parse a program and print its commands.
    Parse {
        file: String,
        /// Parts a single command may hold, plus one.
        #[arg(long, default_value_t = DEFAULT_FRAGMENT_CAPACITY, value_parser = parse_capacity)]
        fragment_capacity: usize,
    },

    /// Explain a diagnostic code (e.g. 8 or PL0008).
    Explain { code: String },
}

fn parse_capacity(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{e}"))?;
    if n < 2 {
        return Err("capacity must be at least 2".to_string());
    }
    Ok(n)
}

// ── Main ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let format = Format::resolve_or_detect(cli.output.as_deref());

    match cli.cmd {
        Cmd::Run {
            file,
            home,
            no_cwd,
            fragment_capacity,
        } => cmd_run(&file, home, no_cwd, fragment_capacity, format)?,
        Cmd::Parse {
            file,
            fragment_capacity,
        } => cmd_parse(&file, fragment_capacity, format)?,
        Cmd::Explain { code } => cmd_explain(&code, format)?,
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Commands ────────────────────────────────────────────────────────────

fn cmd_run(
    file: &str,
    home: Option<PathBuf>,
    no_cwd: bool,
    fragment_capacity: usize,
    format: Format,
) -> Result<()> {
    let (input, parsed) = read_and_parse(file, fragment_capacity)?;
    let mut diagnostics = Vec::new();

    match parsed {
        Ok(mut program) => {
            let mut config = LoaderConfig::from_env().search_current_dir(!no_cwd);
            if let Some(home) = home {
                config = config.with_home(home);
            }
            tracing::debug!(file, commands = program.len(), "running program");
            let mut engine = Engine::new(&mut program, NativeLoader::new(config));
            let result = engine.run();
            diagnostics.extend(engine.take_warnings());
            if let Err(e) = result {
                diagnostics.push(e);
            }
        }
        Err(e) => diagnostics.push(e),
    }

    match format {
        Format::Json => Envelope::<()>::new(None, &diagnostics).print()?,
        Format::Pretty => {
            render_diagnostics_pretty(&input, file, &diagnostics);
            print_summary(&diagnostics);
        }
    }

    exit_on_errors(&diagnostics);
    Ok(())
}

fn cmd_parse(file: &str, fragment_capacity: usize, format: Format) -> Result<()> {
    let (input, parsed) = read_and_parse(file, fragment_capacity)?;
    let (program, diagnostics) = match parsed {
        Ok(program) => (Some(program), Vec::new()),
        Err(e) => (None, vec![e]),
    };

    match format {
        Format::Json => {
            Envelope::new(program.as_ref().map(ProgramDump::new), &diagnostics).print()?;
        }
        Format::Pretty => {
            // Program to stdout, diagnostics to stderr.
            if let Some(program) = &program {
                print!("{}", to_text(program));
            }
            render_diagnostics_pretty(&input, file, &diagnostics);
            print_summary(&diagnostics);
        }
    }

    exit_on_errors(&diagnostics);
    Ok(())
}

fn cmd_explain(code: &str, format: Format) -> Result<()> {
    let digits = code
        .strip_prefix("PL")
        .or_else(|| code.strip_prefix("pl"))
        .unwrap_or(code);
    let Ok(raw) = digits.parse::<u16>() else {
        bail!("`{code}` is not a diagnostic code");
    };
    let code = ErrorCode(raw);
    let text = code.explain();

    match format {
        Format::Json => {
            let out = serde_json::json!({
                "id": code.id(),
                "code": code.as_u16(),
                "explanation": text,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Pretty => {
            // Explanation is the expected output, so it goes to stdout.
            if let Some(text) = text {
                use ariadne::Fmt;
                println!("{}: {}", code.id().fg(ariadne::Color::Cyan), text);
            } else {
                println!("{}: (no explanation available)", code.id());
            }
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Read `file` and parse it. Read failures are errors; parse failures are
/// returned for rendering.
fn read_and_parse(
    file: &str,
    fragment_capacity: usize,
) -> Result<(String, Result<Program, Diagnostic>)> {
    let input = fs::read_to_string(file).with_context(|| format!("failed to read '{file}'"))?;
    let config = ParseConfig::for_file(file).with_fragment_capacity(fragment_capacity);
    let parsed = parse_with_config(&input, &config);
    Ok((input, parsed))
}

/// Exit with code 1 if any diagnostic is an error.
/// Warnings do not cause a non-zero exit.
fn exit_on_errors(diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        process::exit(1);
    }
}
