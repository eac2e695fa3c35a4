use std::path::Path;

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use rayon::prelude::*;

use crate::{
    presence::{FacePresence, HandPresence},
    types::{FaceObservation, Frame},
};

/// How letterboxed pixels are mapped into the model's input range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    /// `[0, 1]`, as the MediaPipe palm detector expects.
    ZeroOne,
    /// `[-1, 1]`, as BlazeFace expects.
    SignedUnit,
}

impl Normalization {
    fn apply(self, value: u8) -> f32 {
        match self {
            Normalization::ZeroOne => value as f32 / 255.0,
            Normalization::SignedUnit => value as f32 / 127.5 - 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScoreModelConfig {
    pub input_size: u32,
    pub normalization: Normalization,
    /// Index of the per-anchor logit output.
    pub score_output: usize,
    pub score_threshold: f32,
}

impl ScoreModelConfig {
    pub fn palm() -> Self {
        Self {
            input_size: 192,
            normalization: Normalization::ZeroOne,
            score_output: 1,
            score_threshold: 0.5,
        }
    }

    pub fn blaze_face() -> Self {
        Self {
            input_size: 128,
            normalization: Normalization::SignedUnit,
            score_output: 1,
            score_threshold: 0.6,
        }
    }
}

/// Single-shot detector reduced to "is anything there": the best anchor score
/// after a sigmoid, compared against a threshold. Box decoding is skipped.
pub struct ScoreHeadDetector {
    session: Session,
    cfg: ScoreModelConfig,
    label: &'static str,
}

impl ScoreHeadDetector {
    pub fn new(label: &'static str, model_path: &Path, cfg: ScoreModelConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load {label} from {}", model_path.display()))?;

        log::info!("{label} ready using {}", model_path.display());
        Ok(Self {
            session,
            cfg,
            label,
        })
    }

    pub fn best_score(&mut self, frame: &Frame) -> Result<f32> {
        let input = letterbox_tensor(frame, self.cfg.input_size, self.cfg.normalization)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .with_context(|| format!("failed to run {} session", self.label))?;

        if outputs.len() <= self.cfg.score_output {
            return Err(anyhow!(
                "{} returned {} outputs, expected at least {}",
                self.label,
                outputs.len(),
                self.cfg.score_output + 1
            ));
        }

        let scores = outputs[self.cfg.score_output].try_extract_array::<f32>()?;
        let logits = scores
            .as_slice()
            .ok_or_else(|| anyhow!("{} scores not contiguous", self.label))?;

        Ok(max_sigmoid(logits).unwrap_or(0.0))
    }

    pub fn present(&mut self, frame: &Frame) -> Result<bool> {
        let score = self.best_score(frame)?;
        log::trace!("{} best score {score:.3}", self.label);
        Ok(score >= self.cfg.score_threshold)
    }
}

pub struct PalmPresence {
    detector: ScoreHeadDetector,
}

impl PalmPresence {
    pub fn load(model_path: &Path) -> Result<Self> {
        Ok(Self {
            detector: ScoreHeadDetector::new("palm detector", model_path, ScoreModelConfig::palm())?,
        })
    }
}

impl HandPresence for PalmPresence {
    fn check(&mut self, frame: &Frame) -> Result<bool> {
        self.detector.present(frame)
    }
}

/// Face detection without identities: every hit is an unrecognized face.
pub struct FaceModelPresence {
    detector: ScoreHeadDetector,
}

impl FaceModelPresence {
    pub fn load(model_path: &Path) -> Result<Self> {
        Ok(Self {
            detector: ScoreHeadDetector::new(
                "face detector",
                model_path,
                ScoreModelConfig::blaze_face(),
            )?,
        })
    }
}

impl FacePresence for FaceModelPresence {
    fn check(&mut self, frame: &Frame) -> Result<FaceObservation> {
        Ok(if self.detector.present(frame)? {
            FaceObservation::detected()
        } else {
            FaceObservation::none()
        })
    }
}

/// Stand-in when no face model is configured.
pub struct NoFaceModel;

impl FacePresence for NoFaceModel {
    fn check(&mut self, _frame: &Frame) -> Result<FaceObservation> {
        Ok(FaceObservation::none())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn max_sigmoid(logits: &[f32]) -> Option<f32> {
    logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| sigmoid(v.clamp(-100.0, 100.0)))
        .reduce(f32::max)
}

/// Letterboxes an RGBA frame into a square NHWC tensor of `target_size`.
pub fn letterbox_tensor(
    frame: &Frame,
    target_size: u32,
    normalization: Normalization,
) -> Result<Array4<f32>> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.width == 0 || frame.height == 0 || frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {} for {}x{}",
            frame.rgba.len(),
            expected_len,
            frame.width,
            frame.height
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((frame.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let pad_x = (side - new_w as usize) / 2;
    let pad_y = (side - new_h as usize) / 2;
    let mut canvas = vec![0u8; side * side * 4];
    let dst_stride = side * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                normalization.apply(px[0]),
                normalization.apply(px[1]),
                normalization.apply(px[2]),
            ]
        })
        .collect();

    Array4::<f32>::from_shape_vec((1, side, side, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}
