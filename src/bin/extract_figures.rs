use std::path::PathBuf;

use clap::Parser;
use figmap::{
    CommandSplitter, Config, DocumentSession, ExtractionMode, PdfSource, SubfigureSplitter,
    UnavailableSplitter,
};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Extract numbered figures from a PDF and match them to their citations.")]
struct Args {
    /// Input PDF
    input: PathBuf,

    /// TOML configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving `images/`
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Figure extraction strategy
    #[arg(long, value_enum)]
    mode: Option<ExtractionMode>,

    /// Minimum encoded size of an accepted figure, in bytes
    #[arg(long)]
    min_image_size: Option<usize>,

    /// Pages searched on each side of a figure's first mention
    #[arg(long)]
    window: Option<u32>,

    /// Split these figures into panels after loading (repeatable)
    #[arg(long = "split", value_name = "FIGURE")]
    split: Vec<u32>,

    /// Resolve a question such as "figure 3b" against the loaded document
    #[arg(long)]
    query: Option<String>,

    /// Include every citation in the output
    #[arg(long)]
    citations: bool,

    /// Never run the subfigure separator
    #[arg(long)]
    no_splitter: bool,
}

fn build_config(args: &Args) -> Result<Config, String> {
    let mut config = match &args.config {
        Some(path) => Config::from_toml_file(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?,
        None => Config::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(mode) = args.mode {
        config.extraction.mode = mode;
    }
    if let Some(min_image_size) = args.min_image_size {
        config.extraction.min_image_size = min_image_size;
    }
    if let Some(window) = args.window {
        config.matching.window = window;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let source = PdfSource::open(&args.input)
        .map_err(|e| format!("failed to open {}: {e}", args.input.display()))?;
    let command = CommandSplitter::new(config.splitter.clone());
    let splitter: Box<dyn SubfigureSplitter> = if !args.no_splitter && command.is_available() {
        Box::new(command)
    } else {
        Box::new(UnavailableSplitter)
    };
    let mut session = DocumentSession::load(&source, &config, splitter)
        .map_err(|e| format!("failed to load {}: {e}", args.input.display()))?;

    for &figure in &args.split {
        if let Err(err) = session.ensure_subfigures(figure) {
            warn!(figure, "cannot split: {err}");
        }
    }

    let lookup = match &args.query {
        Some(query) => match session.lookup(query) {
            Ok(found) => json!(found),
            Err(err) => json!({ "error": err.to_string() }),
        },
        None => serde_json::Value::Null,
    };

    let mut output = json!({
        "report": session.report(),
        "figures": session.figure_map(),
    });
    if args.citations {
        output["citations"] = json!(session.citations());
    }
    if !lookup.is_null() {
        output["lookup"] = lookup;
    }

    let rendered = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}
