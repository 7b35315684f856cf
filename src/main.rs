/// opencv
/// https://docs.rs/opencv/latest/opencv/all.html
///
/// nalgebra
/// https://docs.rs/nalgebra/latest/nalgebra/
///
/// ndarray
/// https://docs.rs/ndarray/latest/ndarray/all.html
///
extern crate opencv;

mod assembler;
mod camera;
mod config;
mod manifest;
mod modality;
mod resample;
mod undistort;

use std::path::Path;

use crate::config::DataConfig;

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let Some(cfg_arg) = std::env::args().nth(1) else {
        eprintln!("Usage: stereo-dataset <datacfg.json>");
        std::process::exit(1);
    };

    if let Err(e) = run(Path::new(&cfg_arg)) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cfg_path: &Path) -> anyhow::Result<()> {
    let cfg = DataConfig::load(cfg_path)?;
    log::info!(
        "{} @ {}fps -> {}fps, {} segment(s)",
        cfg.target_mov.display(),
        cfg.source_fps,
        cfg.target_fps,
        cfg.segments.len()
    );
    let manifest_path = assembler::run(&cfg, cfg_path)?;
    log::info!("dataset manifest written to {}", manifest_path.display());
    Ok(())
}
