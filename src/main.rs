mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "skycam_stats=debug"
    } else {
        "skycam_stats=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Records go to stdout; keep logs on stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Measure {
            path,
            header,
            format,
            pattern,
            recursive,
            jobs,
            catalog,
            measurement,
        } => {
            let config = measurement.to_config(catalog.load()?);
            commands::measure(
                &path,
                &config,
                &format,
                header,
                pattern.as_deref(),
                recursive,
                jobs,
            )?;
        }
        Commands::Regions { catalog } => {
            commands::list_regions(&catalog.load()?)?;
        }
    }

    Ok(())
}
