//! The apl binary: a thin immediate-execution driver
//!
//! Reads preferences and the environment, runs the optional init script
//! and ⎕LX, then evaluates `--eval` text, a script file, or lines from
//! stdin. The interactive line editor and the `)` command parser are
//! collaborators; this surface exposes the engine.

use apl_runtime::archive;
use apl_runtime::config::{INIT_SCRIPT_ENV, Preferences};
use apl_runtime::Interpreter;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "apl", about = "APL evaluation engine", version)]
struct Args {
    /// Evaluate one expression and exit
    #[arg(long, value_name = "EXPR")]
    eval: Option<String>,

    /// Evaluate a script file line by line
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Load a saved workspace before evaluating
    #[arg(long, value_name = "FILE")]
    ws: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,
}

fn main() {
    let args = Args::parse();

    let filter = match &args.log {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let prefs = Preferences::discover();
    let mut interp = Interpreter::new();
    interp.ws.parallel = prefs.parallel_config();
    interp.ws.lib_paths = prefs.effective_lib_paths();

    if let Some(path) = &args.ws {
        match archive::load_file(path).and_then(|a| archive::install(&mut interp.ws, a)) {
            Ok(()) => tracing::info!(path = %path.display(), "workspace loaded"),
            Err(e) => {
                eprintln!("{}", e.report());
                std::process::exit(1);
            }
        }
    }

    // init script: environment wins over preferences
    let init = std::env::var(INIT_SCRIPT_ENV)
        .ok()
        .map(PathBuf::from)
        .or(prefs.init_script);
    if let Some(path) = init {
        if let Err(code) = run_script(&mut interp, &path) {
            std::process::exit(code);
        }
    }

    if let Err(e) = interp.run_latent() {
        eprintln!("{}", e.report());
    }
    flush_output(&mut interp);

    if let Some(expr) = &args.eval {
        let code = eval_and_print(&mut interp, expr);
        std::process::exit(code);
    }

    if let Some(path) = &args.script {
        match run_script(&mut interp, path) {
            Ok(()) => std::process::exit(0),
            Err(code) => std::process::exit(code),
        }
    }

    // immediate execution from stdin
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim() == ")OFF" {
            std::process::exit(0);
        }
        eval_and_print(&mut interp, &line);
    }
}

fn run_script(interp: &mut Interpreter, path: &PathBuf) -> Result<(), i32> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return Err(2);
        }
    };
    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('⍝') {
            continue;
        }
        if eval_and_print(interp, line) != 0 {
            return Err(1);
        }
    }
    Ok(())
}

fn eval_and_print(interp: &mut Interpreter, line: &str) -> i32 {
    let result = interp.eval_line(line);
    flush_output(interp);
    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}", e.report());
            1
        }
    }
}

fn flush_output(interp: &mut Interpreter) {
    for line in interp.ws.take_output() {
        println!("{}", line);
    }
}
