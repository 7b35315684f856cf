//! Pinhole camera model and the intrinsic-matrix side of the geometric
//! pipeline.
//!
//! Pixels and intrinsics are transformed in lockstep: whatever crop/resize is
//! applied to an image must be mirrored here so the emitted calibration stays
//! usable for 3D reconstruction from the transformed images.

use nalgebra::Matrix3;
use opencv::core::{Mat, CV_64F};
use opencv::prelude::*;

use crate::config::{CropRect, TargetSize};

/// Intrinsics `K` plus lens distortion `D` for one physical camera.
///
/// Values are immutable; derived (rectified or crop/resize-adjusted) variants
/// are new instances, never in-place edits.
#[derive(Debug, Clone)]
pub struct CameraModel {
    pub k: Matrix3<f64>,
    pub d: Vec<f64>,
}

impl CameraModel {
    pub fn new(k: Matrix3<f64>, d: Vec<f64>) -> Self {
        Self { k, d }
    }

    /// Distortion vector of the same arity as `d`, all zeros. Emitted once
    /// undistortion has been baked into the pixels.
    pub fn zero_distortion(&self) -> Vec<f64> {
        vec![0.0; self.d.len()]
    }

    /// Mirror a crop-then-resize pixel transform on the intrinsic matrix.
    ///
    /// `current` is the (width, height) of the image the matrix currently
    /// describes; cropping updates it before the resize scales are computed.
    /// Purely algebraic and deterministic. The caller must not pass a
    /// zero-area crop or a zero current dimension.
    pub fn adjusted(
        &self,
        current: (i32, i32),
        crop: Option<CropRect>,
        resize: Option<TargetSize>,
    ) -> CameraModel {
        let mut k = self.k;
        let (mut width, mut height) = current;
        if let Some(c) = crop {
            k[(0, 2)] -= c.x1 as f64;
            k[(1, 2)] -= c.y1 as f64;
            width = c.x2 - c.x1;
            height = c.y2 - c.y1;
        }
        if let Some(t) = resize {
            let sx = t.width as f64 / width as f64;
            let sy = t.height as f64 / height as f64;
            k[(0, 0)] *= sx;
            k[(1, 1)] *= sy;
            k[(0, 2)] *= sx;
            k[(1, 2)] *= sy;
        }
        CameraModel::new(k, self.d.clone())
    }

    /// `K` as a 3x3 CV_64F [Mat] for the OpenCV calibration routines.
    pub fn k_mat(&self) -> opencv::Result<Mat> {
        matrix3_to_mat(&self.k)
    }

    /// `D` as a 1xN CV_64F [Mat].
    pub fn d_mat(&self) -> opencv::Result<Mat> {
        Mat::from_slice(&self.d)?.try_clone()
    }

    /// Row-major nested-array form of `K` for the manifest.
    pub fn k_rows(&self) -> [[f64; 3]; 3] {
        let mut rows = [[0.0; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.k[(i, j)];
            }
        }
        rows
    }
}

/// 将 [Matrix3] 转换为 [Mat]
pub fn matrix3_to_mat(matrix: &Matrix3<f64>) -> opencv::Result<Mat> {
    let mut mat = Mat::zeros_nd(&[3, 3], CV_64F)?.to_mat()?;
    for i in 0..3 {
        for j in 0..3 {
            *mat.at_2d_mut::<f64>(i as i32, j as i32)? = matrix[(i, j)];
        }
    }
    Ok(mat)
}

/// 将 [Mat] 转换为 [Matrix3]
pub fn mat_to_matrix3(mat: &Mat) -> opencv::Result<Matrix3<f64>> {
    debug_assert!(mat.rows() == 3 && mat.cols() == 3);
    let mut matrix = Matrix3::<f64>::zeros();
    for i in 0..3 {
        for j in 0..3 {
            matrix[(i, j)] = *mat.at_2d::<f64>(i as i32, j as i32)?;
        }
    }
    Ok(matrix)
}
