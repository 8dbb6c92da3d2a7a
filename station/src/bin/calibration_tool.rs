//! Manage stored calibration sessions.
//!
//! Sessions map image rows to ground distances. `import` reads the samples
//! collected by the interactive calibration step and stores them after
//! validation; the remaining subcommands inspect or remove stored sessions.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shared::config_storage::{CalibrationSession, CalibrationStore};
use station::calibration_import::parse_samples;
use station::init_tracing;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage goose sentry calibration sessions")]
struct Args {
    #[arg(
        long,
        help = "Calibration storage directory (default: ~/.goose_sentry)",
        value_name = "DIR"
    )]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and store samples from a CSV or JSON file
    Import {
        /// Session name ([A-Za-z0-9_.-], not starting with '.')
        name: String,
        /// File with `pixel_y,distance_ft` lines or a JSON sample array
        file: PathBuf,
        #[arg(long, help = "Camera zoom setting the samples were taken at")]
        zoom: Option<String>,
        #[arg(long, help = "Free-form notes")]
        notes: Option<String>,
        #[arg(long, help = "Replace an existing session with the same name")]
        force: bool,
    },
    /// List stored sessions, oldest first
    List,
    /// Print a session's samples and fitted range
    Show { name: String },
    /// Distance for one or more pixel rows
    Query {
        name: String,
        #[arg(required = true)]
        rows: Vec<f64>,
    },
    /// Remove a stored session
    Delete { name: String },
}

fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let args = Args::parse();
    let store = match args.storage_root {
        Some(root) => CalibrationStore::with_path(root),
        None => CalibrationStore::new().context("Failed to open calibration storage")?,
    };

    match args.command {
        Command::Import {
            name,
            file,
            zoom,
            notes,
            force,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let samples = parse_samples(&text)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            if !force && store.load_session(&name).is_ok() {
                bail!("Session '{name}' already exists; use --force to replace it");
            }

            let mut session = CalibrationSession::new(name, samples);
            if let Some(zoom) = zoom {
                session = session.with_zoom_label(zoom);
            }
            if let Some(notes) = notes {
                session = session.with_notes(notes);
            }

            let path = store
                .save_session(&session)
                .context("Calibration rejected; collect the samples again")?;
            info!("Saved {}", path.display());
            println!(
                "Saved session '{}' with {} samples to {}",
                session.name,
                session.samples.len(),
                path.display()
            );
        }
        Command::List => {
            let sessions = store.list_sessions().context("Failed to list sessions")?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.root_path().display());
            }
            for s in sessions {
                if s.stem == s.name {
                    println!("{:<24} {:>12} {:>3} samples", s.stem, s.created_at, s.sample_count);
                } else {
                    println!(
                        "{:<24} {:>12} {:>3} samples (recorded as '{}')",
                        s.stem, s.created_at, s.sample_count, s.name
                    );
                }
            }
        }
        Command::Show { name } => {
            let session = store
                .load_session(&name)
                .with_context(|| format!("Failed to load '{name}'"))?;
            let model = session.model()?;
            println!("Session:   {}", session.name);
            println!("Created:   {}", session.created_at);
            if let Some(zoom) = &session.zoom_label {
                println!("Zoom:      {zoom}");
            }
            if let Some(notes) = &session.notes {
                println!("Notes:     {notes}");
            }
            let (low, high) = model.pixel_range();
            let (near, far) = model.distance_range();
            println!("Rows:      {low}..{high}");
            println!("Distance:  {near:.2}..{far:.2} ft ({:?})", model.direction());
            println!("Samples (collection order):");
            for sample in &session.samples {
                println!("  y={:<5} {:>7.2} ft", sample.pixel_y, sample.distance_ft);
            }
        }
        Command::Query { name, rows } => {
            let model = store
                .load_model(&name)
                .with_context(|| format!("Failed to load '{name}'"))?;
            for row in rows {
                println!("y={:<8.1} {:>7.2} ft", row, model.query(row));
            }
        }
        Command::Delete { name } => {
            if store.delete_session(&name)? {
                println!("Deleted '{name}'");
            } else {
                bail!("No session named '{name}'");
            }
        }
    }

    Ok(())
}
