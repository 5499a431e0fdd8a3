use std::io::Write;

use bucketlib::cli::{Cli, Commands};
use bucketlib::commands;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bucketlib=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            script,
            backend,
            data_dir,
        }) => {
            let mut stdout = std::io::stdout().lock();
            let count = commands::run_script(&script, backend, data_dir, &mut stdout)?;
            writeln!(stdout, "{count} keyword(s) passed")?;
            Ok(())
        }
        Some(Commands::Keywords) => {
            for line in commands::keyword_list() {
                println!("{line}");
            }
            Ok(())
        }
        Some(Commands::CreateBucket {
            name,
            password,
            data_dir,
        }) => {
            let path = commands::create_bucket(&name, password.as_deref(), data_dir)?;
            println!("Created bucket '{name}' at {}", path.display());
            Ok(())
        }
        None => {
            Cli::parse_from(["bucketlib", "--help"]);
            Ok(())
        }
    }
}
