use clap::{Parser, Subcommand};
use log::info;
use pmbundle::{Bundle, TreeNode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pmbundle", about = "Inspect Patchmaster .dat bundles")]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and the catalog
    Info {
        input: PathBuf,
    },
    /// Print the record tree as indented labels
    Tree {
        input: PathBuf,
        /// Deepest level to print (0 = root only, 4 = traces)
        #[arg(short, long, default_value = "4")]
        depth: usize,
    },
    /// Dump the decoded record of one node as JSON
    Record {
        input: PathBuf,
        /// Child indices from the root, e.g. `0 1` for series 1 of group 0
        path: Vec<usize>,
    },
    /// Print the scaled samples of one trace
    Samples {
        input:  PathBuf,
        group:  usize,
        series: usize,
        sweep:  usize,
        trace:  usize,
        /// Emit a JSON array instead of one value per line
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let bundle = Bundle::open(&input)?;
            let h = bundle.header();
            println!("── Patchmaster bundle ───────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Signature      {}", h.signature);
            println!("  Version        {}", h.version);
            println!("  Time           {}", h.time);
            println!("  Items          {}", h.items);
            println!("  Byte order     {} (marker {})", h.endian, hex::encode(h.endian_marker));
            println!("  Catalog ({}):", bundle.catalog().len());
            for ext in bundle.catalog() {
                if let Some(e) = bundle.entry(ext) {
                    println!("    {:<6} start {:>10}  length {:>10}", e.ext(), e.start(), e.length());
                }
            }
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { input, depth } => {
            let bundle = Bundle::open(&input)?;
            let tree = bundle.tree()?;
            info!("level sizes {:?}", tree.level_sizes());
            print_node(tree.root(), depth);
        }

        // ── Record ───────────────────────────────────────────────────────────
        Commands::Record { input, path } => {
            let bundle = Bundle::open(&input)?;
            let node = bundle.tree()?.node(&path)?;
            println!("{}", serde_json::to_string_pretty(node.record())?);
        }

        // ── Samples ──────────────────────────────────────────────────────────
        Commands::Samples { input, group, series, sweep, trace, json } => {
            let bundle = Bundle::open(&input)?;
            let info = bundle.trace_info(group, series, sweep, trace)?;
            info!("{} ({}) {} points, {}", info.label, info.y_unit, info.data_points, info.format.name());
            let samples = bundle.read_samples(group, series, sweep, trace)?;
            if json {
                println!("{}", serde_json::to_string(&samples)?);
            } else {
                for v in samples {
                    println!("{v}");
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn print_node(node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(node.level().index());
    println!("{indent}{} {:?} ({} children)", node.level(), node.label(), node.children().len());
    if node.level().index() < depth {
        for child in node.children() {
            print_node(child, depth);
        }
    }
}
