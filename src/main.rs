use std::time::Duration;

use anyhow::{bail, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use nbtest::cli::Cli;
use nbtest::config::Config;
use nbtest::runner::{self, RunOptions};
use nbtest::SessionOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let filter = if args.verbose {
        EnvFilter::new("nbtest=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = Config::load();
    let options = RunOptions {
        session: SessionOptions {
            python: args.python.clone().unwrap_or_else(|| cfg.python()),
            timeout: args
                .timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| cfg.timeout()),
        },
        concurrency: args.tests.min(cfg.max_kernels()),
        filter: args.test_name.clone(),
    };

    let registry = runner::default_registry();
    let report = runner::run_suite(&registry, &args.nb_file, &options).await?;

    if args.quiet {
        let failures = report.failures();
        if !failures.is_empty() {
            let summary: Vec<String> = failures
                .iter()
                .map(|t| format!("{}: {} / {}", t.test, t.achieved_score, t.total_score))
                .collect();
            bail!("tests below maximum score: {}", summary.join(", "));
        }
    } else if args.md {
        let md = report.to_markdown();
        if std::io::stdout().is_terminal() {
            for line in md.lines() {
                if line.starts_with("# ") {
                    println!("{}", line.magenta());
                } else if line.starts_with("## ") {
                    println!("{}", line.cyan());
                } else {
                    println!("{line}");
                }
            }
        } else {
            print!("{md}");
        }
    } else {
        println!("{}", report.to_json());
    }

    Ok(())
}
