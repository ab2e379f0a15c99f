// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod extract;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Speech-bubble OCR for comic pages
#[derive(Parser, Debug)]
#[command(name = "bubble-ocr")]
#[command(version)]
#[command(about = "Extract, order and correct speech-bubble text from comic pages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract bubble text from one or more page images
    Extract(extract::ExtractArgs),

    /// Print the effective configuration as TOML
    ShowConfig(extract::ShowConfigArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Extract(args) => extract::extract(args).await,
        Commands::ShowConfig(args) => extract::show_config(args),
    }
}
