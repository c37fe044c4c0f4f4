use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "kael",
    version,
    about = r#"
kael attaches to a running process, watches its heap allocations, and
records them to a session log for later leak analysis.

EXAMPLES:
    # Attach to an already-instrumented process:
    kael record --pid 12345

    # Attach and inject the instrumentation library first:
    kael record --pid 12345 --inject

    # Convert a recorded session into a CSV report:
    kael convert session/leak.dat --csv report.csv

    # Convert a recorded session into a SQLite database:
    kael convert session/leak.dat --sqlite report.sqlite
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Attach to a target process and record its allocations.
    Record(RecordArgs),

    /// Convert a recorded session log into a relational report.
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Process id of the target to attach to.
    #[arg(short, long)]
    pub pid: u32,

    /// Inject the instrumentation library into the target before attaching.
    #[arg(long)]
    pub inject: bool,

    /// Directory the session log is written under. Defaults to
    /// `Logs/<pid> - <timestamp>` next to this executable.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Path to the `leak.dat` session log to convert.
    pub input: PathBuf,

    /// Write a CSV report to this path.
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write a SQLite database to this path.
    #[arg(long)]
    pub sqlite: Option<PathBuf>,
}
