use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use capitol_import::{Config, Selection, Store};

/// Import scraped legislative data for one jurisdiction.
#[derive(Debug, Parser)]
#[command(name = "capitol-import", version = capitol_import::VERSION)]
struct Cli {
    /// Jurisdiction abbreviation, e.g. `ca`
    jurisdiction: String,

    #[arg(long)]
    bills: bool,
    #[arg(long)]
    legislators: bool,
    #[arg(long)]
    committees: bool,
    /// Standalone vote files are attached during the bill import
    #[arg(long)]
    votes: bool,
    #[arg(long)]
    events: bool,
    /// Everything, same as passing no kind at all
    #[arg(long)]
    alldata: bool,

    /// Config file
    #[arg(long, default_value = "capitol.toml", env = "CAPITOL_CONFIG")]
    config: PathBuf,
    /// Overrides `data_dir` from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Overrides `database` from the config
    #[arg(long)]
    database: Option<PathBuf>,

    /// More output (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn selection(&self) -> Selection {
        let selection = Selection {
            legislators: self.legislators,
            committees: self.committees,
            bills: self.bills || self.votes,
            events: self.events,
        };
        if self.alldata || selection.is_empty() {
            Selection::all()
        } else {
            selection
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }

    let store = Store::open(&config.database).with_context(|| format!("opening {}", config.database.display()))?;
    let abbr = cli.jurisdiction.to_lowercase();
    let report = capitol_import::run(&store, &config, &abbr, cli.selection())
        .with_context(|| format!("importing {abbr}"))?;

    println!("{}", report.summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_kind_flags_means_everything() {
        let cli = Cli::parse_from(["capitol-import", "ca"]);
        assert_eq!(cli.selection(), Selection::all());
    }

    #[test]
    fn test_votes_flag_runs_bill_import() {
        let cli = Cli::parse_from(["capitol-import", "ca", "--votes", "-vv"]);
        let selection = cli.selection();
        assert!(selection.bills);
        assert!(!selection.legislators);
        assert_eq!(cli.verbose, 2);
    }
}
