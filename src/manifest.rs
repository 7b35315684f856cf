//! Dataset manifest serialization (`dataset.json`).
//!
//! Records are appended in segment/frame order and written once at the end of
//! the run. Serialization is deterministic: fixed struct field order, sorted
//! modality-path map, no timestamps.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::camera::CameraModel;

/// Calibration emitted per frame. The distortion vectors are zero because
/// undistortion has been baked into the pixels; the K's already reflect the
/// run's crop/resize.
#[derive(Debug, Serialize)]
pub struct FrameCalibration {
    #[serde(rename = "K_left")]
    pub k_left: [[f64; 3]; 3],
    #[serde(rename = "K_right")]
    pub k_right: [[f64; 3]; 3],
    #[serde(rename = "D_left")]
    pub d_left: Vec<f64>,
    #[serde(rename = "D_right")]
    pub d_right: Vec<f64>,
}

impl FrameCalibration {
    pub fn new(left: &CameraModel, right: &CameraModel) -> Self {
        Self {
            k_left: left.k_rows(),
            k_right: right.k_rows(),
            d_left: left.zero_distortion(),
            d_right: right.zero_distortion(),
        }
    }
}

/// One emitted dataset row. Paths are relative to `out_dir`; a modality that
/// produced no file for this frame is simply absent from the map.
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub frame: i64,
    pub source_frame: i64,
    pub split: String,
    pub paths: BTreeMap<&'static str, String>,
    pub calibration: FrameCalibration,
}

pub fn write_manifest(path: &Path, records: &[FrameRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create manifest {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)
        .with_context(|| format!("cannot serialize manifest {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    #[test]
    fn record_serializes_with_expected_field_names() {
        let cam = CameraModel::new(Matrix3::identity(), vec![0.1, 0.2]);
        let mut paths = BTreeMap::new();
        paths.insert("left", "seq1/left/00000.png".to_string());
        let record = FrameRecord {
            frame: 0,
            source_frame: 0,
            split: "train".to_string(),
            paths,
            calibration: FrameCalibration::new(&cam, &cam),
        };
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["paths"]["left"], "seq1/left/00000.png");
        assert_eq!(v["calibration"]["D_left"], serde_json::json!([0.0, 0.0]));
        assert!(v["calibration"]["K_right"].is_array());
    }
}
