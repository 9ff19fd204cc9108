//! Neural cloud segmentation
//!
//! A [`SegmentationModel`] maps a `(N, C, H, W)` tensor of reflectance
//! bands to `(N, 1, H, W)` unnormalized cloud scores. Scenes are reflect
//! padded so both spatial dimensions are multiples of [`PAD_MULTIPLE`],
//! scored, passed through a sigmoid, thresholded and cropped back.
//!
//! The crate ships one model, [`PixelwiseModel`], a per-pixel logistic
//! layer loaded from JSON. Heavier networks plug in through the trait.

use std::path::Path;

use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4};
use serde::{Deserialize, Serialize};

use clearsky_core::{Error, Result};

/// Spatial dimensions of the model input are padded to multiples of this
pub const PAD_MULTIPLE: usize = 32;

/// A cloud segmentation network.
pub trait SegmentationModel: Send + Sync {
    /// Number of input channels the model expects
    fn in_channels(&self) -> usize;

    /// Score a batch: `(N, C, H, W)` in, `(N, 1, H, W)` logits out
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>>;
}

/// Logistic sigmoid
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Round `n` up to the next multiple of [`PAD_MULTIPLE`]
pub fn padded_len(n: usize) -> usize {
    n.div_ceil(PAD_MULTIPLE) * PAD_MULTIPLE
}

/// Mirror index `i` into `0..n` without repeating the edge sample
fn reflect_index(i: usize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i % period;
    if m < n {
        m
    } else {
        period - m
    }
}

/// Reflect-pad a band on the bottom and right edges to `rows` x `cols`.
pub fn reflect_pad(band: ArrayView2<'_, f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (h, w) = band.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| band[[reflect_index(r, h), reflect_index(c, w)]])
}

/// Run `model` over a scene and threshold the sigmoid scores.
///
/// `channels` are the model inputs in order, all the same shape. Nodata
/// and non-finite inputs are fed as zero and are never reported as cloud.
pub fn segment_clouds(
    model: &dyn SegmentationModel,
    channels: &[ArrayView2<'_, f32>],
    nodata: Option<f32>,
    threshold: f32,
) -> Result<Array2<bool>> {
    let first = channels
        .first()
        .ok_or_else(|| Error::Algorithm("segmentation needs at least one channel".into()))?;
    if channels.len() != model.in_channels() {
        return Err(Error::Algorithm(format!(
            "model expects {} channels, scene has {}",
            model.in_channels(),
            channels.len()
        )));
    }
    let (h, w) = first.dim();
    if let Some(bad) = channels.iter().find(|c| c.dim() != (h, w)) {
        let (ar, ac) = bad.dim();
        return Err(Error::SizeMismatch { er: h, ec: w, ar, ac });
    }

    let is_missing = |v: f32| !v.is_finite() || nodata == Some(v);
    let (ph, pw) = (padded_len(h), padded_len(w));

    let mut input = Array4::<f32>::zeros((1, channels.len(), ph, pw));
    for (i, band) in channels.iter().enumerate() {
        let cleaned = band.mapv(|v| if is_missing(v) { 0.0 } else { v });
        input
            .slice_mut(s![0, i, .., ..])
            .assign(&reflect_pad(cleaned.view(), ph, pw));
    }

    let scores = model.predict(input.view())?;
    if scores.dim() != (1, 1, ph, pw) {
        return Err(Error::Algorithm(format!(
            "model returned shape {:?}, expected (1, 1, {}, {})",
            scores.dim(),
            ph,
            pw
        )));
    }

    Ok(Array2::from_shape_fn((h, w), |(r, c)| {
        let has_data = channels.iter().all(|band| !is_missing(band[[r, c]]));
        has_data && sigmoid(scores[[0, 0, r, c]]) > threshold
    }))
}

/// Per-pixel logistic model: `score = bias + sum(weights[c] * x[c])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelwiseModel {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl PixelwiseModel {
    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self =
            serde_json::from_str(json).map_err(|e| Error::Algorithm(format!("invalid model file: {}", e)))?;
        if model.weights.is_empty() {
            return Err(Error::Algorithm("model has no weights".into()));
        }
        Ok(model)
    }

    /// Load a model artifact from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl SegmentationModel for PixelwiseModel {
    fn in_channels(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = batch.dim();
        if c != self.weights.len() {
            return Err(Error::Algorithm(format!("expected {} channels, got {}", self.weights.len(), c)));
        }
        Ok(Array4::from_shape_fn((n, 1, h, w), |(i, _, r, col)| {
            self.weights
                .iter()
                .enumerate()
                .fold(self.bias, |acc, (ch, wt)| acc + wt * batch[[i, ch, r, col]])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(1), 32);
        assert_eq!(padded_len(32), 32);
        assert_eq!(padded_len(33), 64);
        assert_eq!(padded_len(0), 0);
    }

    #[test]
    fn test_reflect_pad_mirrors_without_edge() {
        let band = array![[1.0f32, 2.0, 3.0]];
        let padded = reflect_pad(band.view(), 2, 6);
        assert_eq!(padded.row(0).to_vec(), vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0]);
        // Single row reflects onto itself
        assert_eq!(padded.row(1), padded.row(0));
    }

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.999);
    }

    #[test]
    fn test_pixelwise_segmentation() {
        // Cloud when green > 0.3
        let model = PixelwiseModel::from_json(r#"{"weights": [0.0, 10.0], "bias": -3.0}"#).unwrap();
        let blue = array![[0.1f32, 0.1, 0.1], [0.1, 0.1, -9999.0]];
        let green = array![[0.5f32, 0.1, 0.4], [0.2, 0.35, 0.9]];
        let mask = segment_clouds(&model, &[blue.view(), green.view()], Some(-9999.0), 0.5).unwrap();
        assert_eq!(mask, array![[true, false, true], [false, true, false]]);
    }

    #[test]
    fn test_channel_count_mismatch() {
        let model = PixelwiseModel { weights: vec![1.0; 3], bias: 0.0 };
        let band = Array2::<f32>::zeros((4, 4));
        assert!(segment_clouds(&model, &[band.view()], None, 0.5).is_err());
        assert!(PixelwiseModel::from_json(r#"{"weights": [], "bias": 0}"#).is_err());
        assert!(PixelwiseModel::from_json("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"weights": [1.0, 2.0, 3.0, 4.0, 5.0], "bias": -1.5}"#).unwrap();
        let model = PixelwiseModel::load(&path).unwrap();
        assert_eq!(model.in_channels(), 5);
        assert_relative_eq!(model.bias, -1.5);
    }
}
