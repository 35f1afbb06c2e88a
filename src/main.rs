use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hotwork_permit_client::commands::{self, AppContext};
use hotwork_permit_client::config;
use hotwork_permit_client::forms::FormPhase;

#[derive(Parser)]
#[command(name = "hotwork-client", version, about = "Hot-work permit inspection client")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress and upload photos, printing their stored URLs
    Upload {
        #[arg(required = true)]
        photos: Vec<String>,
    },
    /// Upload a form's photos and submit the form
    Submit {
        /// pre, during or after
        phase: FormPhase,
        /// Form value as key=value, repeatable
        #[arg(long = "field", value_parser = commands::parse_field)]
        fields: Vec<(String, String)>,
        #[arg(long)]
        photo1: Option<String>,
        #[arg(long)]
        photo2: Option<String>,
    },
    /// Show dropdown choices, or the projects of one company
    Dropdowns {
        #[arg(long)]
        company: Option<String>,
    },
    /// Search submitted records of a day
    Search {
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        company: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded =
        config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(loaded.config.log_level.as_str()),
    )
    .init();
    loaded.log_notices();
    let config = loaded.config;

    log::info!("Starting Hotwork Permit Client against {}", config.api_endpoint);

    if let Command::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let ctx = AppContext::new(config)?;

    match cli.command {
        Command::Upload { photos } => {
            let results = commands::upload_photos(&ctx, &photos).await?;
            let mut failed = 0;
            for (photo, result) in results {
                match result {
                    Ok(url) => println!("{} -> {}", photo, url),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", photo, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} uploads failed", failed, photos.len());
            }
        }
        Command::Submit {
            phase,
            fields,
            photo1,
            photo2,
        } => {
            let response = commands::submit_form(
                &ctx,
                phase,
                &fields,
                [photo1.as_deref(), photo2.as_deref()],
            )
            .await
            .context("Submission failed")?;
            println!("✅ Submitted {} form", phase);
            log::debug!("Server response: {}", response);
        }
        Command::Dropdowns { company } => {
            println!("{}", commands::show_dropdowns(&ctx, company.as_deref()).await?);
        }
        Command::Search { date, company } => {
            let table = commands::search(&ctx, date.as_deref(), company.as_deref())
                .await
                .context("Search failed")?;
            println!("{}", table);
        }
        Command::Config => {}
    }

    Ok(())
}
