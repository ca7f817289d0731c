use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "nbtest", about = "Execute and grade notebooks against a kernel", version)]
#[command(group(ArgGroup::new("output").args(["json", "md", "quiet"]).multiple(false)))]
pub struct Cli {
    /// Notebook file (.ipynb) to load.
    #[arg(value_name = "NB_FILE")]
    pub nb_file: PathBuf,

    /// Test to execute (all if omitted).
    #[arg(value_name = "TEST_NAME")]
    pub test_name: Option<String>,

    /// Print the report as JSON (default).
    #[arg(long)]
    pub json: bool,

    /// Print the report as Markdown.
    #[arg(long)]
    pub md: bool,

    /// Print nothing; fail if any test misses its maximum score.
    #[arg(long)]
    pub quiet: bool,

    /// Number of tests to process concurrently.
    #[arg(long, default_value_t = 1000)]
    pub tests: usize,

    /// Override the per-cell timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Python interpreter to launch kernels with.
    #[arg(long)]
    pub python: Option<String>,

    /// Print verbosely to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
