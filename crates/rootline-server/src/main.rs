//! Rootline server admin CLI.
//!
//! Inspects and maintains the SQLite tree database that clients sync with.
//!
//! Usage:
//!   rootline-server --db trees.db trees
//!   rootline-server --db trees.db log <TREE> --after 40
//!   rootline-server --db trees.db replay <TREE>
//!   rootline-server --db trees.db check <TREE> --config rootline.ron
//!   rootline-server --db trees.db compact <TREE> --prune
//!   rootline-server --db trees.db activity <TREE> --action ADD_NODE
//!
//! Output goes to stdout as JSON, one document per line; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rootline_server::{TreeDb, admin};
use rootline_sync::SyncConfig;
use rootline_types::{ActivityQuery, Clock, OpKind, SystemClock, TreeId};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

/// Admin tool for rootline tree databases.
#[derive(Parser, Debug)]
#[command(name = "rootline-server")]
#[command(about = "Inspect and maintain rootline operation logs and snapshots")]
struct Args {
    /// Path to the SQLite database
    #[arg(long, default_value = "rootline.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List trees with their log head and snapshot version
    Trees,

    /// Print logged operations
    Log {
        tree: TreeId,
        /// Only operations with a version greater than this
        #[arg(long, default_value_t = 0)]
        after: u64,
    },

    /// Rebuild a tree from snapshot plus log and report what was applied
    Replay { tree: TreeId },

    /// Run the consistency checker over a rebuilt tree
    Check {
        tree: TreeId,
        /// RON file with sync and checker settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Rewrite snapshot rows at the log head
    Compact {
        tree: TreeId,
        /// Also delete log entries the new snapshot covers
        #[arg(long)]
        prune: bool,
    },

    /// Print recent activity, newest first
    Activity {
        tree: TreeId,
        #[arg(long, value_parser = parse_action)]
        action: Option<OpKind>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn parse_action(s: &str) -> Result<OpKind, String> {
    OpKind::from_str(s).ok_or_else(|| format!("unknown operation type: {s}"))
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let db = TreeDb::open(&args.db).with_context(|| format!("opening {}", args.db.display()))?;
    tracing::debug!(db = %args.db.display(), "database opened");

    match args.command {
        Command::Trees => {
            for stats in db.trees()? {
                print(&stats)?;
            }
        }
        Command::Log { tree, after } => {
            for op in db.operations_since(tree, after)? {
                print(&op)?;
            }
        }
        Command::Replay { tree } => {
            let (graph, report) = admin::rebuild(&db, tree)?;
            print(&serde_json::json!({
                "tree_id": tree,
                "people": graph.len(),
                "report": report,
            }))?;
        }
        Command::Check { tree, config } => {
            let config = match config {
                Some(path) => SyncConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
                None => SyncConfig::default(),
            };
            let report = admin::audit(&db, tree, &config.check, SystemClock.today())?;
            print(&report)?;
        }
        Command::Compact { tree, prune } => {
            print(&admin::compact(&db, tree, prune)?)?;
        }
        Command::Activity { tree, action, limit } => {
            let query = ActivityQuery { action, limit, ..Default::default() };
            for entry in db.query_activity(tree, &query)? {
                print(&entry)?;
            }
        }
    }

    Ok(())
}
