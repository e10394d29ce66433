use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;

use qone::{report, Overrides};
use qone_exec::KernelProfile;

/// Vectorized TPC-H Q1 engine.
#[derive(Parser)]
#[command(name = "qone", author, version, about = "TPC-H Q1 engine and benchmark driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the query and print the result with timings.
    Run {
        #[command(flatten)]
        opts: Overrides,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
        /// Append the Prometheus metrics dump.
        #[arg(long)]
        metrics: bool,
    },

    /// Check every kernel variant against the row-at-a-time reference.
    Verify {
        #[command(flatten)]
        opts: Overrides,
    },

    /// Run the query and print the per-stage cycle report.
    Profile {
        #[command(flatten)]
        opts: Overrides,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let opts = match &cli.command {
        Commands::Run { opts, .. } | Commands::Verify { opts } | Commands::Profile { opts } => opts,
    };

    let mut config = opts.resolve()?;
    let logging = qone_log::init(config.log.level()?, config.log.dir.as_deref())?;
    config.validate()?;
    if let Some(directives) = &config.log.filter {
        logging.set_filter(directives)?;
    }
    let table = Arc::new(qone::load_table(&config.data)?);

    match cli.command {
        Commands::Run { json, metrics, .. } => {
            let run = qone::run(&config, table)?;
            if json {
                println!("{}", report::to_json(&run)?);
            } else {
                print!("{}", report::render(&run));
            }
            if metrics {
                print!("{}", qone_metrics::render()?);
            }
        }

        Commands::Verify { .. } => {
            let outcomes = qone::verify(&config, &table)?;
            print!("{}", report::render_verify(&outcomes));
            let failed = outcomes.iter().filter(|o| !o.matches).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} variants disagree with the reference", outcomes.len());
            }
            println!("all {} variants match the reference", outcomes.len());
        }

        Commands::Profile { .. } => {
            if !KernelProfile::enabled() {
                warn!("built without the `profile` feature, stage counters are empty");
            }
            let run = qone::run(&config, table)?;
            print!("{}", report::render(&run));
            println!();
            print!("{}", report::render_stages(&run.stages));
        }
    }
    Ok(())
}
