use std::io;

use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use decoy::{self_identity, Harness, SignalStop};

fn init_logging() -> anyhow::Result<()> {
    // Stdout carries the output record; diagnostics stay on stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging()?;

    let identity = self_identity();
    let stdout = io::stdout();

    let mut harness = Harness::new(identity, SignalStop, stdout.lock());
    let outcome = harness.run()?;

    debug!(?outcome, "harness finished");

    Ok(())
}
