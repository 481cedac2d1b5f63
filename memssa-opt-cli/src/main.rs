use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use memssa_opt::diagnostic::LogSink;
use memssa_opt::graph_export::{DOT_PASS_NAME, GraphExportPass};
use memssa_opt::ir_parser::parse_module;
use memssa_opt::ir_processor::dead_store_elimination::{DSE_PASS_NAME, DeadStoreEliminationPass};
use memssa_opt::pass::{Config, FlatConfig, PassContext, PassRegistry, Pipeline};

mod logger;

/// Runs memory graph passes over a textual IR module.
#[derive(Debug, Parser)]
#[command(name = "memssa-opt", version)]
struct Args {
    /// Input IR file
    input: PathBuf,

    /// Comma separated passes, run in order on every function
    #[arg(short, long, default_value = DSE_PASS_NAME)]
    passes: String,

    /// Directory the memssa-dot pass writes into
    #[arg(long)]
    dot_dir: Option<PathBuf>,

    /// Write the resulting module here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Check the memory graph after every pass
    #[arg(long)]
    verify: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn registry() -> anyhow::Result<PassRegistry> {
    let mut registry = PassRegistry::new();
    registry.register(DSE_PASS_NAME, || Box::new(DeadStoreEliminationPass::new()))?;
    registry.register(DOT_PASS_NAME, || Box::new(GraphExportPass))?;
    Ok(registry)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(args.verbose)?;

    let config = Config::from(FlatConfig {
        dot_dir: args.dot_dir,
        verify_memory_ssa: args.verify,
    });
    let mut pipeline = Pipeline::parse(&args.passes, &registry()?)?;

    let input = std::fs::read_to_string(&args.input)?;
    let mut module = parse_module(&input)?;

    let mut sink = LogSink;
    let mut ctx = PassContext::new(&config, &mut sink);
    let changed = pipeline.run_on_module(&mut module, &mut ctx)?;
    log::debug!("module changed: {}", changed);

    let text = module.to_string();
    match args.output {
        Some(output) => std::fs::write(output, text)?,
        None => std::io::stdout().write_all(text.as_bytes())?,
    }

    Ok(())
}
