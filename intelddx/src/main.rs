// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use intelddx_common::Generation;
use log::info;
use std::path::PathBuf;

/// intelddx - Intel DRI2/EXA acceleration layer, headless harness
#[derive(Parser, Debug)]
#[command(
    name = "intelddx",
    version,
    about = "Drives the Intel DRI2/EXA acceleration layer against a simulated device"
)]
struct Args {
    /// Path to config file (default: ~/.config/intelddx/intelddx.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hardware generation (i830, i915, i965 or a chipset name)
    #[arg(short, long)]
    generation: Option<String>,

    /// Number of frames to present
    #[arg(short, long, default_value_t = 60)]
    frames: u32,

    /// Screen width in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Screen height in pixels
    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Present by copy only, never page flip
    #[arg(long)]
    no_flip: bool,

    /// Pretend a software shadow surface is active
    #[arg(long)]
    shadow: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("intelddx - Intel DRI2/EXA acceleration layer");
    info!("============================================");

    // Load config, then let the command line override it
    let mut settings = config::load_config(args.config.as_ref());
    if let Some(name) = &args.generation {
        settings.generation = Generation::parse(name)
            .with_context(|| format!("Unknown generation: {}", name))?;
    }
    if args.no_flip {
        settings.use_swap_buffers = false;
    }
    if args.shadow {
        settings.shadow = true;
    }
    if args.width == 0 || args.height == 0 {
        anyhow::bail!("Screen size must be non-zero, got {}x{}", args.width, args.height);
    }
    info!(
        "Generation: {}, tiling: {}, swap buffers: {}, DRI2 version: {}",
        settings.generation, settings.tiling, settings.use_swap_buffers, settings.dri2_version
    );

    let mut session = session::Session::new(&settings, args.width, args.height)?;
    info!(
        "DRI2 driver '{}', features {:?}",
        session.screen().caps().driver_name,
        session.screen().caps().features
    );

    session.run(args.frames)?;
    let flips = session.device().flips().len();
    let stats = session.finish();

    info!(
        "Presented {} frames: {} flips ({} reached the display), {} copies, {} unsynchronized, {} composite fallbacks",
        stats.frames,
        stats.flips,
        flips,
        stats.copies,
        stats.unsynchronized,
        stats.composite_fallbacks
    );
    Ok(())
}
