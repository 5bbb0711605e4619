//! menu-cached - The menu cache daemon
//!
//! menu-cached provides:
//! - One shared cache file per (menu, language, environment) request
//! - Regeneration through the external menu generator
//! - Debounced invalidation when menu or desktop entry files change
//! - Reload notices to every subscribed client

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    // Check for unsupported platforms
    #[cfg(windows)]
    {
        eprintln!("Error: Windows is not supported. menu-cached needs unix sockets.");
        std::process::exit(1);
    }

    let cli = cli::Cli::parse();
    cli::run(cli)
}
