//! splice — load an IR module, JIT-compile it, and drive it interactively.

mod host;
mod repl;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use splice_engine::{bytecode, parse_module, BoundModule, Context, JitEngine, Module};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "splice")]
#[command(about = "Minimal JIT execution engine with host symbol redirection")]
#[command(version)]
struct Cli {
    /// IR module to run: `.sir` text, anything else is a binary container
    #[arg(value_name = "FILE", required_unless_present = "demo")]
    file: Option<PathBuf>,

    /// Run the built-in demo module instead of loading a file
    #[arg(long, conflicts_with = "file")]
    demo: bool,

    /// Entry symbol to look up and execute
    #[arg(long, default_value = "sum")]
    entry: String,

    /// Encode the loaded module into a binary container at PATH and exit
    #[arg(long, value_name = "PATH")]
    emit: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => host::shutdown(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            host::shutdown(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Arc::new(Context::new());
    let module = load(&cli, &ctx)?;

    if let Some(out) = &cli.emit {
        bytecode::save_module(out, &module, &ctx)?;
        println!("wrote {}", out.display());
        return Ok(());
    }

    let engine = JitEngine::new()?;
    engine.unit().add_resolver(Arc::new(host::HostFunctions));

    // Parked from here on so every exit path — including the panic
    // redirect — tears the instance down through the same cell.
    host::install_engine(engine);

    host::with_engine(|engine| engine.add_module(BoundModule::new(module, ctx)))?;
    let addr = host::with_engine(|engine| engine.lookup(&cli.entry))?;

    // The interactive protocol fixes the entry signature; a module whose
    // entry differs is undefined behavior, not a reported error.
    let entry: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };

    repl::drive(entry)
}

fn load(cli: &Cli, ctx: &Context) -> anyhow::Result<Module> {
    if cli.demo {
        return Ok(splice_engine::build_sum_module(ctx));
    }

    let path = cli.file.as_deref().expect("clap enforces FILE or --demo");
    if path.extension().is_some_and(|ext| ext == "sir") {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        Ok(parse_module(&source, ctx)?)
    } else {
        Ok(bytecode::load_module(path, ctx)?)
    }
}
