//! Loam CLI
//!
//! Front end over the engine façade: an interactive REPL (rustyline with
//! persistent history), file execution, one-shot eval, and shell
//! completions. Configuration merges an optional `loam.toml` with CLI
//! flags; CLI wins.

use std::io;
use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::EnvFilter;

use loam_runtime::call;
use loam_runtime::context::{Backend, RuntimeContext};
use loam_runtime::loader;

mod config;
mod repl;

#[derive(Parser)]
#[command(name = "loam")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Loam - a Clojure dialect with no JVM", long_about = None)]
struct Cli {
    /// Evaluation backend: tree-walk, bytecode, or compare
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Extra classpath roots searched by require / load-file
    #[arg(long = "classpath", value_name = "DIR", global = true)]
    classpath: Vec<PathBuf>,

    /// Path to a loam.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable the garbage collector (debugging aid)
    #[arg(long, global = true)]
    no_gc: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive REPL (the default)
    Repl,

    /// Evaluate a source file
    Run {
        /// Input .clj source file
        input: PathBuf,
    },

    /// Evaluate an expression and print the result
    Eval {
        /// Source text
        expr: String,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "loam", &mut io::stdout());
        return;
    }

    let mut cfg = config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        process::exit(2);
    });
    if let Some(backend) = cli.backend {
        cfg.backend = backend;
    }
    if cli.no_gc {
        cfg.gc_enabled = false;
    }
    cfg.classpath.extend(cli.classpath.iter().cloned());

    let mut ctx = RuntimeContext::new(cfg);

    let code = match cli.command {
        None | Some(Commands::Repl) => repl::run(&mut ctx),
        Some(Commands::Run { input }) => run_file(&mut ctx, &input),
        Some(Commands::Eval { expr }) => eval_expr(&mut ctx, &expr),
        Some(Commands::Completions { .. }) => unreachable!("handled above"),
    };
    process::exit(code);
}

fn run_file(ctx: &mut RuntimeContext, input: &PathBuf) -> i32 {
    match loader::load_path(ctx, input) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}", repl::describe_error(ctx, &e));
            1
        }
    }
}

fn eval_expr(ctx: &mut RuntimeContext, expr: &str) -> i32 {
    match loam_runtime::engine::evaluate_source(ctx, expr, "<eval>") {
        Ok(v) => {
            match call::pr_str_value(ctx, &v) {
                Ok(s) => println!("{}", s),
                Err(_) => println!("#<unprintable>"),
            }
            0
        }
        Err(e) => {
            eprintln!("{}", repl::describe_error(ctx, &e));
            1
        }
    }
}

