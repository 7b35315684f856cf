//! Per-camera undistortion remap tables.
//!
//! Each table is built at most once per run, on the first frame where a
//! source image of known size is readable for that side, and reused for every
//! later frame and modality referencing the side. The rectified camera matrix
//! uses the minimal-crop policy (alpha = 0): only the region free of
//! out-of-source pixels survives.

use anyhow::Result;
use opencv::calib3d;
use opencv::core::{Mat, Size, CV_32FC1};
use opencv::prelude::*;

use crate::camera::{mat_to_matrix3, CameraModel};

/// Which physical camera a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSide {
    Left,
    Right,
}

impl CameraSide {
    pub fn name(self) -> &'static str {
        match self {
            CameraSide::Left => "left",
            CameraSide::Right => "right",
        }
    }
}

/// Precomputed dest-pixel -> source-sample lookup plus the rectified camera
/// it corresponds to.
#[derive(Debug)]
pub struct UndistortMap {
    pub map_x: Mat,
    pub map_y: Mat,
    /// Rectified model: optimal new K, distortion baked out (D = zeros).
    pub rectified: CameraModel,
    pub width: i32,
    pub height: i32,
}

impl UndistortMap {
    pub fn build(camera: &CameraModel, width: i32, height: i32) -> Result<Self> {
        let k = camera.k_mat()?;
        let d = camera.d_mat()?;
        let size = Size::new(width, height);

        // alpha = 0: keep only valid pixels. Fixed design constant.
        let new_k =
            calib3d::get_optimal_new_camera_matrix(&k, &d, size, 0.0, size, None, false)?;

        let mut map_x = Mat::default();
        let mut map_y = Mat::default();
        calib3d::init_undistort_rectify_map(
            &k,
            &d,
            &Mat::default(),
            &new_k,
            size,
            CV_32FC1,
            &mut map_x,
            &mut map_y,
        )?;

        let rectified = CameraModel::new(mat_to_matrix3(&new_k)?, camera.zero_distortion());
        Ok(Self { map_x, map_y, rectified, width, height })
    }
}

/// Keyed store `camera side -> (remap table, rectified K)`, owned by the
/// assembler and threaded through each frame's processing.
#[derive(Debug, Default)]
pub struct UndistortCache {
    left: Option<UndistortMap>,
    right: Option<UndistortMap>,
}

impl UndistortCache {
    pub fn get(&self, side: CameraSide) -> Option<&UndistortMap> {
        match side {
            CameraSide::Left => self.left.as_ref(),
            CameraSide::Right => self.right.as_ref(),
        }
    }

    /// Build the side's map if not yet present. A cached map is never
    /// replaced, so the rectified K cannot silently change mid-run.
    pub fn ensure(
        &mut self,
        side: CameraSide,
        camera: &CameraModel,
        width: i32,
        height: i32,
    ) -> Result<()> {
        let slot = match side {
            CameraSide::Left => &mut self.left,
            CameraSide::Right => &mut self.right,
        };
        if slot.is_none() {
            *slot = Some(UndistortMap::build(camera, width, height)?);
            log::info!("undistortion map ready for {} ({}x{})", side.name(), width, height);
        }
        Ok(())
    }

    /// Both sides built, i.e. the full stereo calibration is known.
    pub fn ready(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn camera() -> CameraModel {
        let k = Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0);
        CameraModel::new(k, vec![-0.05, 0.001, 0.0, 0.0])
    }

    #[test]
    fn map_matches_requested_size() {
        let map = UndistortMap::build(&camera(), 64, 48).unwrap();
        assert_eq!(map.map_x.cols(), 64);
        assert_eq!(map.map_x.rows(), 48);
        assert_eq!(map.map_y.cols(), 64);
        assert_eq!(map.rectified.d, vec![0.0; 4]);
    }

    #[test]
    fn cache_builds_once_per_side() {
        let cam = camera();
        let mut cache = UndistortCache::default();
        assert!(!cache.ready());
        cache.ensure(CameraSide::Left, &cam, 64, 48).unwrap();
        let first = cache.get(CameraSide::Left).unwrap().rectified.k;
        // A second ensure with a different size must be a no-op.
        cache.ensure(CameraSide::Left, &cam, 128, 96).unwrap();
        let again = cache.get(CameraSide::Left).unwrap();
        assert_eq!(again.rectified.k, first);
        assert_eq!(again.width, 64);
        assert!(!cache.ready());
        cache.ensure(CameraSide::Right, &cam, 64, 48).unwrap();
        assert!(cache.ready());
    }

    #[test]
    fn distortion_displaces_off_center_pixels() {
        let map = UndistortMap::build(&camera(), 64, 48).unwrap();
        // Barrel distortion plus the alpha=0 zoom must move samples away
        // from the identity grid off the principal point.
        let x: f32 = *map.map_x.at_2d::<f32>(5, 5).unwrap();
        let y: f32 = *map.map_y.at_2d::<f32>(5, 5).unwrap();
        assert!(
            (x - 5.0).abs() > 1e-2 || (y - 5.0).abs() > 1e-2,
            "map is identity at (5,5): ({x}, {y})"
        );
    }

    #[test]
    fn zero_distortion_keeps_identity_mapping() {
        let cam = CameraModel::new(
            Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0),
            vec![0.0, 0.0, 0.0, 0.0],
        );
        let map = UndistortMap::build(&cam, 64, 48).unwrap();
        // With D = 0 the optimal new matrix equals K and the map is identity.
        let x: f32 = *map.map_x.at_2d::<f32>(10, 20).unwrap();
        let y: f32 = *map.map_y.at_2d::<f32>(10, 20).unwrap();
        assert!((x - 20.0).abs() < 1e-3);
        assert!((y - 10.0).abs() < 1e-3);
    }
}
