//! plate_targets - manage the target plate list and inspect the detection log

use anyhow::Result;
use clap::{Parser, Subcommand};

use plate_watch::{normalize, DetectionLogStore, SqliteStore, TargetPlateStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the plate watch database.
    #[arg(long, env = "PLATEWATCH_DB_PATH", default_value = "platewatch.db")]
    db_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List target plates.
    List,
    /// Add a target plate.
    Add { plate: String },
    /// Rename a target plate.
    Edit { id: i64, plate: String },
    /// Remove one target plate.
    Remove { id: i64 },
    /// Remove every target plate.
    Clear,
    /// Show the detection log, newest first.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete detection log rows and their screenshots.
    DeleteLogs {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Normalise raw OCR text the way the camera sessions do.
    Normalize { text: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if let Command::Normalize { text } = &args.command {
        let plate = normalize(text);
        if plate.is_empty() {
            println!("(no plate)");
        } else {
            println!("{}", plate);
        }
        return Ok(());
    }

    let store = SqliteStore::open(&args.db_path)?;
    match args.command {
        Command::List => {
            for target in TargetPlateStore::list(&store)? {
                println!("{:>5}  {}", target.id, target.plat_nomor);
            }
        }
        Command::Add { plate } => {
            let target = store.add(&plate)?;
            println!("added {} (id {})", target.plat_nomor, target.id);
        }
        Command::Edit { id, plate } => {
            let target = store.edit(id, &plate)?;
            println!("target {} is now {}", target.id, target.plat_nomor);
        }
        Command::Remove { id } => {
            store.delete(id)?;
            println!("removed target {}", id);
        }
        Command::Clear => {
            let count = store.delete_all()?;
            println!("removed {} target(s)", count);
        }
        Command::Logs { limit } => {
            for entry in DetectionLogStore::list(&store)?.into_iter().take(limit) {
                println!(
                    "{:>5}  {}  {:<12} {}  {}",
                    entry.id,
                    entry.timestamp,
                    entry.plat_nomor,
                    if entry.is_target { "TARGET" } else { "      " },
                    entry.screenshot_path.as_deref().unwrap_or("-")
                );
            }
        }
        Command::DeleteLogs { ids } => {
            let count = store.delete_by_ids(&ids)?;
            println!("deleted {} log entries", count);
        }
        Command::Normalize { .. } => {}
    }
    Ok(())
}
