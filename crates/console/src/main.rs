use clap::Parser;

use conduit_console::{Cli, Console, LoggerListener};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    conduit_observability::init(cli.verbosity());

    let console = Console::builder().listener(LoggerListener::new).build();
    console.run(&cli)?;
    Ok(())
}
