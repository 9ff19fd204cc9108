//! ONNX segmentation networks through tract
//!
//! The graph is kept in inference form and planned for each input shape it
//! meets, so one exported network serves canvases of any padded size.

use std::path::Path;

use ndarray::{Array4, ArrayView4};
use tract_onnx::prelude::*;

use clearsky_core::{Error, Result};

use super::neural::SegmentationModel;

fn tract_err(e: TractError) -> Error {
    Error::Algorithm(format!("onnx model: {e}"))
}

/// An exported `(N, C, H, W) -> (N, 1, H, W)` logit network
#[derive(Debug, Clone)]
pub struct OnnxModel {
    model: InferenceModel,
    channels: usize,
}

impl OnnxModel {
    /// Load a network that takes `channels` input bands
    pub fn load<P: AsRef<Path>>(path: P, channels: usize) -> Result<Self> {
        let model = tract_onnx::onnx().model_for_path(path).map_err(tract_err)?;
        Self::new(model, channels)
    }

    pub fn from_bytes(bytes: &[u8], channels: usize) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .map_err(tract_err)?;
        Self::new(model, channels)
    }

    fn new(model: InferenceModel, channels: usize) -> Result<Self> {
        if model.inputs.len() != 1 || model.outputs.len() != 1 {
            return Err(Error::Algorithm(format!(
                "onnx model has {} inputs and {} outputs, expected one of each",
                model.inputs.len(),
                model.outputs.len()
            )));
        }
        Ok(Self { model, channels })
    }
}

impl SegmentationModel for OnnxModel {
    fn in_channels(&self) -> usize {
        self.channels
    }

    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = batch.dim();
        let plan = self
            .model
            .clone()
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(tract_err)?;

        let values: Vec<f32> = batch.iter().copied().collect();
        let input = Tensor::from_shape(&[n, c, h, w], &values).map_err(tract_err)?;
        let outputs = plan.run(tvec!(input.into())).map_err(tract_err)?;
        let scores = outputs
            .first()
            .ok_or_else(|| Error::Algorithm("onnx model produced no output".into()))?;

        let shape = scores.shape().to_vec();
        if shape != [n, 1, h, w] {
            return Err(Error::Algorithm(format!(
                "onnx model returned shape {shape:?}, expected [{n}, 1, {h}, {w}]"
            )));
        }
        let data = scores.as_slice::<f32>().map_err(tract_err)?.to_vec();
        Array4::from_shape_vec((n, 1, h, w), data).map_err(|e| Error::Algorithm(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masking::neural::{segment_clouds, PixelwiseModel};
    use ndarray::Array2;

    // Minimal protobuf writer for the handful of ONNX messages a 1x1
    // convolution needs.
    fn varint(buf: &mut Vec<u8>, mut v: u64) {
        while v >= 0x80 {
            buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        buf.push(v as u8);
    }

    fn int_field(buf: &mut Vec<u8>, field: u64, v: u64) {
        varint(buf, field << 3);
        varint(buf, v);
    }

    fn bytes_field(buf: &mut Vec<u8>, field: u64, bytes: &[u8]) {
        varint(buf, (field << 3) | 2);
        varint(buf, bytes.len() as u64);
        buf.extend_from_slice(bytes);
    }

    fn tensor(name: &str, dims: &[u64], values: &[f32]) -> Vec<u8> {
        let mut t = Vec::new();
        for &d in dims {
            int_field(&mut t, 1, d);
        }
        // FLOAT
        int_field(&mut t, 2, 1);
        bytes_field(&mut t, 8, name.as_bytes());
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        bytes_field(&mut t, 9, &raw);
        t
    }

    fn value_info(name: &str, dims: &[&str]) -> Vec<u8> {
        let mut shape = Vec::new();
        for d in dims {
            let mut dim = Vec::new();
            match d.parse::<u64>() {
                Ok(n) => int_field(&mut dim, 1, n),
                Err(_) => bytes_field(&mut dim, 2, d.as_bytes()),
            }
            bytes_field(&mut shape, 1, &dim);
        }
        let mut tensor_type = Vec::new();
        int_field(&mut tensor_type, 1, 1);
        bytes_field(&mut tensor_type, 2, &shape);
        let mut ty = Vec::new();
        bytes_field(&mut ty, 1, &tensor_type);

        let mut info = Vec::new();
        bytes_field(&mut info, 1, name.as_bytes());
        bytes_field(&mut info, 2, &ty);
        info
    }

    /// `logits = bias + sum(weights[c] * x[c])` as a 1x1 Conv graph
    fn conv_model(weights: &[f32], bias: f32) -> Vec<u8> {
        let c = weights.len() as u64;
        let mut node = Vec::new();
        for input in ["x", "w", "b"] {
            bytes_field(&mut node, 1, input.as_bytes());
        }
        bytes_field(&mut node, 2, b"logits");
        bytes_field(&mut node, 4, b"Conv");

        let mut graph = Vec::new();
        bytes_field(&mut graph, 1, &node);
        bytes_field(&mut graph, 2, b"cloudnet");
        bytes_field(&mut graph, 5, &tensor("w", &[1, c, 1, 1], weights));
        bytes_field(&mut graph, 5, &tensor("b", &[1], &[bias]));
        bytes_field(&mut graph, 11, &value_info("x", &["N", &c.to_string(), "H", "W"]));
        bytes_field(&mut graph, 12, &value_info("logits", &["N", "1", "H", "W"]));

        let mut opset = Vec::new();
        bytes_field(&mut opset, 1, b"");
        int_field(&mut opset, 2, 13);

        let mut model = Vec::new();
        int_field(&mut model, 1, 7);
        bytes_field(&mut model, 7, &graph);
        bytes_field(&mut model, 8, &opset);
        model
    }

    #[test]
    fn test_conv_network_matches_pixelwise_model() {
        let weights = [0.0, 10.0, 0.0, -2.0];
        let onnx = OnnxModel::from_bytes(&conv_model(&weights, -3.05), 4).unwrap();
        let linear = PixelwiseModel {
            weights: weights.to_vec(),
            bias: -3.05,
        };
        assert_eq!(onnx.in_channels(), 4);

        let bands: Vec<Array2<f32>> = (0..4)
            .map(|b| Array2::from_shape_fn((20, 45), |(r, c)| ((r * 7 + c * 3 + b * 11) % 17) as f32 / 20.0))
            .collect();
        let views: Vec<_> = bands.iter().map(|b| b.view()).collect();
        let expected = segment_clouds(&linear, &views, None, 0.5).unwrap();
        let mask = segment_clouds(&onnx, &views, None, 0.5).unwrap();
        assert_eq!(mask, expected);
        assert!(mask.iter().any(|&m| m) && mask.iter().any(|&m| !m));
    }

    #[test]
    fn test_load_from_file_and_reject_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudnet.onnx");
        std::fs::write(&path, conv_model(&[1.0, 1.0], 0.0)).unwrap();
        let model = OnnxModel::load(&path, 2).unwrap();

        let batch = Array4::from_elem((1, 2, 32, 32), 0.25f32);
        let scores = model.predict(batch.view()).unwrap();
        assert_eq!(scores.dim(), (1, 1, 32, 32));
        assert!(scores.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        std::fs::write(&path, b"not a network").unwrap();
        assert!(OnnxModel::load(&path, 2).is_err());
    }
}
