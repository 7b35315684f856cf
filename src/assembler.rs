//! Dataset assembly: drives the resampler, the undistortion cache and the
//! modality pipeline over every segment and destination frame, and writes
//! the manifest.
//!
//! Per-frame problems are logged and skipped; only configuration-level
//! failures abort the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use opencv::prelude::*;

use crate::camera::CameraModel;
use crate::config::{DataConfig, Segment};
use crate::manifest::{self, FrameCalibration, FrameRecord};
use crate::modality::{self, Modality, PayloadKind};
use crate::resample;
use crate::undistort::{CameraSide, UndistortCache, UndistortMap};

/// Process every segment and write `dataset.json`. Returns the manifest path.
pub fn run(cfg: &DataConfig, cfg_path: &Path) -> Result<PathBuf> {
    let modalities = modality::configured(cfg)?;
    let left_cam = cfg.calibration.left_camera();
    let right_cam = cfg.calibration.right_camera();
    let mut cache = UndistortCache::default();
    let mut records: Vec<FrameRecord> = Vec::new();

    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("cannot create {}", cfg.out_dir.display()))?;
    // Keep the exact configuration next to the data it produced.
    let cfg_copy = cfg.out_dir.join("datacfg.json");
    if cfg_path != cfg_copy {
        fs::copy(cfg_path, &cfg_copy)
            .with_context(|| format!("cannot copy config into {}", cfg.out_dir.display()))?;
    }

    let step = resample::frame_step(cfg.source_fps, cfg.target_fps);
    // The crop rectangle can only be checked against real image dimensions,
    // which are first known when a map gets built. Checked once, fatally.
    let mut crop_checked = cfg.crop.is_none();
    for (i, segment) in cfg.segments.iter().enumerate() {
        let seq_no = i + 1;
        let seq_dir = cfg.out_dir.join(format!("seq{seq_no}"));
        for m in &modalities {
            fs::create_dir_all(seq_dir.join(m.name))
                .with_context(|| format!("cannot create {}", seq_dir.join(m.name).display()))?;
        }

        let [start, end] = segment.range;
        let (dest_start, dest_end) =
            resample::map_range(start, end, cfg.source_fps, cfg.target_fps);
        if dest_end < dest_start {
            log::warn!("seq{seq_no}: source range {start}..={end} maps to no destination frames");
            continue;
        }
        log::info!(
            "seq{seq_no} ({}): source frames {start}..={end} -> destination {dest_start}..={dest_end}",
            segment.split
        );

        for dest in dest_start..=dest_end {
            let source = resample::map_index(dest, step);
            let record = process_frame(
                cfg, &modalities, &left_cam, &right_cam, &mut cache, segment, seq_no, dest, source,
            );
            if !crop_checked {
                let built = cache
                    .get(CameraSide::Left)
                    .or_else(|| cache.get(CameraSide::Right));
                if let (Some(c), Some(map)) = (cfg.crop, built) {
                    let clamped = c.clamped(map.width, map.height);
                    ensure!(
                        clamped.width() > 0 && clamped.height() > 0,
                        "crop rectangle [[{},{}],[{},{}]] lies outside the {}x{} source images",
                        c.x1,
                        c.y1,
                        c.x2,
                        c.y2,
                        map.width,
                        map.height
                    );
                    crop_checked = true;
                }
            }
            if let Some(record) = record {
                records.push(record);
            }
        }
    }

    let manifest_path = cfg.out_dir.join("dataset.json");
    manifest::write_manifest(&manifest_path, &records)?;
    log::info!("{} frame records written", records.len());
    Ok(manifest_path)
}

/// Transform every configured modality for one destination frame. Returns a
/// record only when at least one camera image was produced and both sides'
/// undistortion maps (hence the full calibration) are known.
#[allow(clippy::too_many_arguments)]
fn process_frame(
    cfg: &DataConfig,
    modalities: &[Modality],
    left_cam: &CameraModel,
    right_cam: &CameraModel,
    cache: &mut UndistortCache,
    segment: &Segment,
    seq_no: usize,
    dest: i64,
    source: i64,
) -> Option<FrameRecord> {
    let mut paths = BTreeMap::new();
    for m in modalities {
        let camera = match m.side {
            CameraSide::Left => left_cam,
            CameraSide::Right => right_cam,
        };
        match process_modality(cfg, m, camera, cache, seq_no, dest, source) {
            Ok(Some(rel)) => {
                paths.insert(m.name, rel);
            }
            Ok(None) => {}
            Err(e) => log::warn!("{} destination frame {dest}: {e:#}", m.name),
        }
    }

    if !paths.contains_key("left") && !paths.contains_key("right") {
        log::warn!("no stereo image for destination frame {dest} (source {source}), skipped");
        return None;
    }
    let Some(calibration) = frame_calibration(cache, cfg) else {
        log::warn!("calibration not yet initialized at destination frame {dest}, skipped");
        return None;
    };

    Some(FrameRecord {
        frame: dest,
        source_frame: source,
        split: segment.split.clone(),
        paths,
        calibration,
    })
}

/// Read, transform and write one modality's payload for one frame.
/// `Ok(None)` means the source frame does not exist (sparse coverage).
fn process_modality(
    cfg: &DataConfig,
    m: &Modality,
    camera: &CameraModel,
    cache: &mut UndistortCache,
    seq_no: usize,
    dest: i64,
    source: i64,
) -> Result<Option<String>> {
    let src = m.source_path(source);
    if !src.exists() {
        if m.is_camera_image() {
            log::warn!("missing source frame {}", src.display());
        } else {
            log::debug!("no {} payload at {}", m.name, src.display());
        }
        return Ok(None);
    }

    // An extra modality is never written before its side's undistortion map
    // exists; every payload of a run must share one geometry.
    if !m.is_camera_image() && cache.get(m.side).is_none() {
        log::debug!(
            "{} deferred at source frame {source}: {} map not built yet",
            m.name,
            m.side.name()
        );
        return Ok(None);
    }

    let rel = m.relative_dest(seq_no, dest);
    let dest_path = cfg.out_dir.join(&rel);

    match m.kind {
        PayloadKind::Raster => {
            let Some(img) = modality::read_raster(&src)? else {
                log::warn!("unreadable image {}", src.display());
                return Ok(None);
            };
            if m.is_camera_image() {
                cache.ensure(m.side, camera, img.cols(), img.rows())?;
            }
            let out =
                modality::apply_geometry(&img, m.policy, cache.get(m.side), cfg.crop, cfg.resize)?;
            modality::write_raster(&dest_path, &out)?;
        }
        PayloadKind::DenseArray => {
            let arr = modality::read_dense(&src)?;
            let mat = modality::dense_to_mat(&arr)?;
            let out =
                modality::apply_geometry(&mat, m.policy, cache.get(m.side), cfg.crop, cfg.resize)?;
            modality::write_dense(&dest_path, &modality::mat_to_dense(&out)?)?;
        }
    }
    Ok(Some(rel))
}

/// Run-wide adjusted calibration: the cached rectified K of each side with
/// the run's crop/resize mirrored in. Recomputed per frame from the same
/// cached state, so every record carries an identical block.
fn frame_calibration(cache: &UndistortCache, cfg: &DataConfig) -> Option<FrameCalibration> {
    let left = cache.get(CameraSide::Left)?;
    let right = cache.get(CameraSide::Right)?;
    let adjust = |map: &UndistortMap| {
        let crop = cfg.crop.map(|c| c.clamped(map.width, map.height));
        map.rectified.adjusted((map.width, map.height), crop, cfg.resize)
    };
    Some(FrameCalibration::new(&adjust(left), &adjust(right)))
}
