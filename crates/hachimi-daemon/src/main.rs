//! Hachimi
//!
//! Engagement history for saved content, with weighted resurfacing.
//!
//! # Usage
//!
//! ```bash
//! hachimi observe item.json
//! hachimi resonance --count 3
//! hachimi history --window 1w --interaction favorite --sort score
//! hachimi serve < requests.jsonl
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/hachimi/config.toml)
//! 3. Environment variables (HACHIMI_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use hachimi_daemon::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}
