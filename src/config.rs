//! Run configuration (`datacfg.json`).
//!
//! Loaded once at startup; every field is immutable for the rest of the run.
//! Validation failures are fatal and happen before any output is written.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use nalgebra::Matrix3;
use serde::Deserialize;

use crate::camera::CameraModel;

/// Crop rectangle `(x1,y1)-(x2,y2)` in the current pixel coordinate space.
/// Serialized as `[[x1, y1], [x2, y2]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[[i32; 2]; 2]")]
pub struct CropRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl From<[[i32; 2]; 2]> for CropRect {
    fn from(v: [[i32; 2]; 2]) -> Self {
        Self { x1: v[0][0], y1: v[0][1], x2: v[1][0], y2: v[1][1] }
    }
}

impl CropRect {
    /// Clamp to `[0, width) x [0, height)` so an out-of-bounds rectangle
    /// never slices outside the image.
    pub fn clamped(&self, width: i32, height: i32) -> CropRect {
        CropRect {
            x1: self.x1.clamp(0, width),
            y1: self.y1.clamp(0, height),
            x2: self.x2.clamp(0, width),
            y2: self.y2.clamp(0, height),
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Target output resolution, serialized as `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[i32; 2]")]
pub struct TargetSize {
    pub height: i32,
    pub width: i32,
}

impl From<[i32; 2]> for TargetSize {
    fn from(v: [i32; 2]) -> Self {
        Self { height: v[0], width: v[1] }
    }
}

/// One contiguous chunk of source frame indices assigned to a dataset split.
#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    pub range: [i64; 2],
    pub split: String,
}

/// Stereo calibration block: intrinsics and distortion per physical camera.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    #[serde(rename = "K1")]
    pub k1: [[f64; 3]; 3],
    pub dist1: Vec<f64>,
    #[serde(rename = "K2")]
    pub k2: [[f64; 3]; 3],
    pub dist2: Vec<f64>,
}

impl CalibrationConfig {
    pub fn left_camera(&self) -> CameraModel {
        CameraModel::new(rows_to_matrix3(&self.k1), self.dist1.clone())
    }

    pub fn right_camera(&self) -> CameraModel {
        CameraModel::new(rows_to_matrix3(&self.k2), self.dist2.clone())
    }
}

fn rows_to_matrix3(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| rows[i][j])
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Source video path; its stem names the extraction directory under
    /// `out_dir` that holds the raw left/right frames.
    pub target_mov: PathBuf,
    pub out_dir: PathBuf,
    pub source_fps: f64,
    pub target_fps: f64,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub resize: Option<TargetSize>,
    pub calibration: CalibrationConfig,
    pub segments: Vec<Segment>,
    // Extra modality roots. Absent root means the modality is not part of
    // this run at all.
    #[serde(default)]
    pub depth_root: Option<PathBuf>,
    #[serde(default)]
    pub depth_view_root: Option<PathBuf>,
    #[serde(default)]
    pub occ_root: Option<PathBuf>,
    #[serde(default, rename = "inst-seg_root")]
    pub inst_seg_root: Option<PathBuf>,
    #[serde(default, rename = "inst-seg_overlay_root")]
    pub inst_seg_overlay_root: Option<PathBuf>,
}

impl DataConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let cfg: DataConfig = serde_json::from_str(&text)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.source_fps > 0.0 && self.target_fps > 0.0,
            "frame rates must be positive (source_fps={}, target_fps={})",
            self.source_fps,
            self.target_fps
        );
        ensure!(
            self.target_fps <= self.source_fps,
            "target_fps {} exceeds source_fps {}",
            self.target_fps,
            self.source_fps
        );
        if let Some(c) = self.crop {
            ensure!(
                c.x2 > c.x1 && c.y2 > c.y1,
                "crop rectangle [[{},{}],[{},{}]] is empty",
                c.x1,
                c.y1,
                c.x2,
                c.y2
            );
        }
        if let Some(t) = self.resize {
            ensure!(
                t.width > 0 && t.height > 0,
                "resize [{}, {}] is degenerate",
                t.height,
                t.width
            );
        }
        Ok(())
    }

    /// Directory the upstream extraction stage wrote the raw left/right
    /// frames into: `out_dir/{stem(target_mov)}`.
    pub fn extraction_dir(&self) -> Result<PathBuf> {
        let stem = self
            .target_mov
            .file_stem()
            .with_context(|| format!("target_mov {} has no file stem", self.target_mov.display()))?;
        Ok(self.out_dir.join(stem))
    }
}
