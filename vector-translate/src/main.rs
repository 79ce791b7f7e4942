//! Point d'entrée CLI pour vector-translate

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use vector_translate::cli::TranslateArgs;
use vector_translate::{run, DriverRegistry, RunStatus};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Traduire des couches vectorielles d'une datasource à une autre
#[derive(Parser)]
#[command(name = "vector-translate")]
#[command(author, version)]
#[command(about = "Translate vector layers between GeoJSON, PostGIS and in-memory datasources")]
#[command(
    long_about = "Translate vector layers between datasources, with field selection, filters, reprojection, clipping and geometry operations.\n\nExample: vector-translate -f PostgreSQL \"PG:dbname=gis\" communes.geojson --t-srs EPSG:2154"
)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    args: TranslateArgs,
}

fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = cli.args.into_config()?;
    let report = run(&config, &DriverRegistry::default())?;

    if !cli.quiet {
        report.display();
    }
    if let Some(path) = &config.report {
        report.save_to_file(path)?;
        info!("Report saved to {}", path.display());
    }

    if report.status == RunStatus::Failed {
        bail!("Translation failed: {}", report.summary());
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
