//! Modality descriptors and the shared geometric transform pipeline.
//!
//! Two payload shapes flow through the same pipeline: 8-bit raster images
//! (PNG) and dense f32 arrays (npy, e.g. depth). Dense arrays are lifted into
//! a CV_32FC1 [Mat] so undistort/crop/resize behave identically for both.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};
use opencv::core::{Mat, Rect, Scalar, Size, Vector, BORDER_CONSTANT};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::config::{CropRect, DataConfig, TargetSize};
use crate::undistort::{CameraSide, UndistortMap};

/// Interpolation policy, chosen per modality by semantic type: label-like
/// data must not be blended across object boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplePolicy {
    Nearest,
    Linear,
}

impl ResamplePolicy {
    fn interpolation(self) -> i32 {
        match self {
            ResamplePolicy::Nearest => imgproc::INTER_NEAREST,
            ResamplePolicy::Linear => imgproc::INTER_LINEAR,
        }
    }
}

/// Storage family of a modality's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// 8-bit imagery, read/written with `imgcodecs` (PNG).
    Raster,
    /// Dense f32 array, read/written as `.npy`.
    DenseArray,
}

/// One data stream of the dataset: where its source frames live, how it is
/// stored and resampled, and which camera's undistortion map applies.
#[derive(Debug, Clone)]
pub struct Modality {
    /// Output subdirectory and manifest key.
    pub name: &'static str,
    pub source_root: PathBuf,
    pub extension: &'static str,
    pub kind: PayloadKind,
    pub policy: ResamplePolicy,
    pub side: CameraSide,
}

impl Modality {
    fn raster(name: &'static str, root: PathBuf, policy: ResamplePolicy, side: CameraSide) -> Self {
        Self { name, source_root: root, extension: "png", kind: PayloadKind::Raster, policy, side }
    }

    fn dense(name: &'static str, root: PathBuf, side: CameraSide) -> Self {
        Self {
            name,
            source_root: root,
            extension: "npy",
            kind: PayloadKind::DenseArray,
            policy: ResamplePolicy::Nearest,
            side,
        }
    }

    /// Left/right imagery gates both undistortion-map construction and
    /// manifest emission; extra modalities do not.
    pub fn is_camera_image(&self) -> bool {
        matches!(self.name, "left" | "right")
    }

    pub fn source_path(&self, source_index: i64) -> PathBuf {
        self.source_root.join(format!("{:05}.{}", source_index, self.extension))
    }

    /// Destination path relative to `out_dir`, also the manifest path value.
    pub fn relative_dest(&self, seq_no: usize, dest_index: i64) -> String {
        format!("seq{}/{}/{:05}.{}", seq_no, self.name, dest_index, self.extension)
    }
}

/// The modality set of a run: left/right always, extras only when their root
/// is configured. Iterated uniformly by the assembler.
pub fn configured(cfg: &DataConfig) -> Result<Vec<Modality>> {
    let extraction = cfg.extraction_dir()?;
    let mut all = vec![
        Modality::raster("left", extraction.join("left"), ResamplePolicy::Linear, CameraSide::Left),
        Modality::raster("right", extraction.join("right"), ResamplePolicy::Linear, CameraSide::Right),
    ];
    if let Some(root) = &cfg.depth_root {
        all.push(Modality::dense("depth", root.clone(), CameraSide::Left));
    }
    if let Some(root) = &cfg.depth_view_root {
        all.push(Modality::raster("depth_view", root.clone(), ResamplePolicy::Linear, CameraSide::Left));
    }
    if let Some(root) = &cfg.occ_root {
        all.push(Modality::raster("occ", root.clone(), ResamplePolicy::Nearest, CameraSide::Left));
    }
    if let Some(root) = &cfg.inst_seg_root {
        all.push(Modality::raster("inst-seg", root.clone(), ResamplePolicy::Nearest, CameraSide::Left));
    }
    if let Some(root) = &cfg.inst_seg_overlay_root {
        all.push(Modality::raster(
            "inst-seg_overlay",
            root.clone(),
            ResamplePolicy::Linear,
            CameraSide::Left,
        ));
    }
    Ok(all)
}

/// Fixed-order geometric pipeline: undistort, crop, resize. Each step is
/// optional; the crop rectangle is clamped to the current bounds and the
/// resize is skipped when the size already matches.
pub fn apply_geometry(
    src: &Mat,
    policy: ResamplePolicy,
    map: Option<&UndistortMap>,
    crop: Option<CropRect>,
    resize: Option<TargetSize>,
) -> Result<Mat> {
    let mut img = match map {
        Some(map) => {
            let mut out = Mat::default();
            imgproc::remap(
                src,
                &mut out,
                &map.map_x,
                &map.map_y,
                policy.interpolation(),
                BORDER_CONSTANT,
                Scalar::all(0.0),
            )?;
            out
        }
        None => src.try_clone()?,
    };

    if let Some(c) = crop {
        let c = c.clamped(img.cols(), img.rows());
        ensure!(
            c.width() > 0 && c.height() > 0,
            "crop rectangle lies outside the {}x{} image",
            img.cols(),
            img.rows()
        );
        let rect = Rect::new(c.x1, c.y1, c.width(), c.height());
        img = Mat::roi(&img, rect)?.try_clone()?;
    }

    if let Some(t) = resize {
        if img.cols() != t.width || img.rows() != t.height {
            let mut out = Mat::default();
            imgproc::resize(
                &img,
                &mut out,
                Size::new(t.width, t.height),
                0.0,
                0.0,
                policy.interpolation(),
            )?;
            img = out;
        }
    }

    Ok(img)
}

/// Decode a raster payload. `None` when the file decodes to nothing, which
/// callers treat like a missing frame.
pub fn read_raster(path: &Path) -> Result<Option<Mat>> {
    let name = path.to_str().context("non-utf8 source path")?;
    let img = imgcodecs::imread(name, imgcodecs::IMREAD_UNCHANGED)?;
    if img.empty() {
        return Ok(None);
    }
    Ok(Some(img))
}

pub fn write_raster(path: &Path, img: &Mat) -> Result<()> {
    let name = path.to_str().context("non-utf8 destination path")?;
    let ok = imgcodecs::imwrite(name, img, &Vector::<i32>::new())?;
    ensure!(ok, "imwrite failed for {}", path.display());
    Ok(())
}

pub fn read_dense(path: &Path) -> Result<Array2<f32>> {
    let arr: Array2<f32> =
        read_npy(path).with_context(|| format!("cannot read npy {}", path.display()))?;
    Ok(arr)
}

pub fn write_dense(path: &Path, arr: &Array2<f32>) -> Result<()> {
    write_npy(path, arr).with_context(|| format!("cannot write npy {}", path.display()))?;
    Ok(())
}

/// 将 [Array2] 转换为 CV_32FC1 [Mat]
pub fn dense_to_mat(arr: &Array2<f32>) -> Result<Mat> {
    let (rows, cols) = arr.dim();
    let standard = arr.as_standard_layout();
    let data = standard.as_slice().context("dense array is not contiguous")?;
    let mat = Mat::new_rows_cols_with_data(rows as i32, cols as i32, data)?.try_clone()?;
    Ok(mat)
}

/// 将 CV_32FC1 [Mat] 转换为 [Array2]
pub fn mat_to_dense(mat: &Mat) -> Result<Array2<f32>> {
    let rows = mat.rows() as usize;
    let cols = mat.cols() as usize;
    let data = mat.data_typed::<f32>()?.to_vec();
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC1;

    fn gradient_mat(rows: i32, cols: i32) -> Mat {
        let mut m = Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(0.0)).unwrap();
        for r in 0..rows {
            for c in 0..cols {
                *m.at_2d_mut::<u8>(r, c).unwrap() = ((r * cols + c) % 251) as u8;
            }
        }
        m
    }

    #[test]
    fn crop_only() {
        let src = gradient_mat(48, 64);
        let crop = CropRect { x1: 10, y1: 5, x2: 40, y2: 25 };
        let out = apply_geometry(&src, ResamplePolicy::Nearest, None, Some(crop), None).unwrap();
        assert_eq!((out.cols(), out.rows()), (30, 20));
        assert_eq!(
            *out.at_2d::<u8>(0, 0).unwrap(),
            *src.at_2d::<u8>(5, 10).unwrap()
        );
    }

    #[test]
    fn out_of_bounds_crop_is_clamped() {
        let src = gradient_mat(48, 64);
        let crop = CropRect { x1: -10, y1: -10, x2: 1000, y2: 1000 };
        let out = apply_geometry(&src, ResamplePolicy::Nearest, None, Some(crop), None).unwrap();
        assert_eq!((out.cols(), out.rows()), (64, 48));
    }

    #[test]
    fn crop_outside_image_is_an_error() {
        let src = gradient_mat(48, 64);
        let crop = CropRect { x1: 100, y1: 100, x2: 200, y2: 200 };
        let err = apply_geometry(&src, ResamplePolicy::Nearest, None, Some(crop), None)
            .unwrap_err();
        assert!(err.to_string().contains("lies outside"));
    }

    #[test]
    fn resize_matches_target() {
        let src = gradient_mat(48, 64);
        let target = TargetSize { height: 24, width: 32 };
        let out = apply_geometry(&src, ResamplePolicy::Linear, None, None, Some(target)).unwrap();
        assert_eq!((out.cols(), out.rows()), (32, 24));
    }

    #[test]
    fn resize_to_same_size_is_identity() {
        let src = gradient_mat(48, 64);
        let target = TargetSize { height: 48, width: 64 };
        let out = apply_geometry(&src, ResamplePolicy::Linear, None, None, Some(target)).unwrap();
        assert_eq!(*out.at_2d::<u8>(17, 23).unwrap(), *src.at_2d::<u8>(17, 23).unwrap());
    }

    #[test]
    fn nearest_keeps_label_values() {
        // Two labels only; linear would invent intermediate values.
        let mut src = Mat::new_rows_cols_with_default(8, 8, CV_8UC1, Scalar::all(0.0)).unwrap();
        for r in 0..8 {
            for c in 4..8 {
                *src.at_2d_mut::<u8>(r, c).unwrap() = 200;
            }
        }
        let target = TargetSize { height: 5, width: 5 };
        let out = apply_geometry(&src, ResamplePolicy::Nearest, None, None, Some(target)).unwrap();
        for r in 0..5 {
            for c in 0..5 {
                let v = *out.at_2d::<u8>(r, c).unwrap();
                assert!(v == 0 || v == 200, "blended label {v}");
            }
        }
    }

    #[test]
    fn remap_changes_distorted_images() {
        use crate::camera::CameraModel;
        use crate::undistort::UndistortMap;
        use nalgebra::Matrix3;

        let cam = CameraModel::new(
            Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0),
            vec![-0.2, 0.0, 0.0, 0.0],
        );
        let map = UndistortMap::build(&cam, 64, 48).unwrap();
        let src = gradient_mat(48, 64);
        let out = apply_geometry(&src, ResamplePolicy::Nearest, Some(&map), None, None).unwrap();
        let mut changed = 0;
        for r in 0..48 {
            for c in 0..64 {
                if out.at_2d::<u8>(r, c).unwrap() != src.at_2d::<u8>(r, c).unwrap() {
                    changed += 1;
                }
            }
        }
        assert!(changed > 0, "remap left every pixel in place");
    }

    #[test]
    fn dense_round_trip() {
        let arr = Array2::from_shape_fn((12, 17), |(r, c)| (r * 17 + c) as f32 * 0.5);
        let mat = dense_to_mat(&arr).unwrap();
        assert_eq!((mat.rows(), mat.cols()), (12, 17));
        let back = mat_to_dense(&mat).unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn dense_geometry_through_mat() {
        let arr = Array2::from_shape_fn((20, 30), |(r, c)| (r * 30 + c) as f32);
        let mat = dense_to_mat(&arr).unwrap();
        let crop = CropRect { x1: 5, y1: 2, x2: 25, y2: 18 };
        let out = apply_geometry(&mat, ResamplePolicy::Nearest, None, Some(crop), None).unwrap();
        let back = mat_to_dense(&out).unwrap();
        assert_eq!(back.dim(), (16, 20));
        assert_eq!(back[(0, 0)], arr[(2, 5)]);
    }

    #[test]
    fn camera_image_detection() {
        let m = Modality::raster("left", PathBuf::from("/x"), ResamplePolicy::Linear, CameraSide::Left);
        assert!(m.is_camera_image());
        let m = Modality::dense("depth", PathBuf::from("/x"), CameraSide::Left);
        assert!(!m.is_camera_image());
        assert_eq!(m.relative_dest(2, 7), "seq2/depth/00007.npy");
        assert_eq!(m.source_path(123), PathBuf::from("/x/00123.npy"));
    }
}
