use clap::Parser;
use hvrescue::error::HvResult;
use rescue::{RescueOptions, handle_rescue};

mod rescue;

#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
enum Cli {
    /// Read and rewrite the fuses of targets inserted one after another
    #[command(name = "rescue", alias = "r")]
    Rescue(RescueOptions),
}

fn main() -> HvResult<()> {
    let cli = Cli::parse();

    let Cli::Rescue(opts) = cli;
    let level = if opts.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // stdout may be the operator console
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    handle_rescue(opts)
}
