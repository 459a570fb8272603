//! ONNX Runtime embedding backend.
//!
//! Decodes the submitted frame, finds the most confident face with an SCRFD
//! detector, crops it and runs ArcFace on the 112x112 crop. Produces an
//! L2-normalised 512-dimensional signature.

use crate::capture::{EmbedError, Embedder};
use crate::types::Signature;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

const DETECTOR_INPUT_SIZE: u32 = 640;
const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_SCORE_THRESHOLD: f32 = 0.5;
const DETECTOR_STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

const RECOGNIZER_INPUT_SIZE: u32 = 112;
const RECOGNIZER_MEAN: f32 = 127.5;
const RECOGNIZER_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
enum OnnxError {
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[error("{0}")]
    Output(String),
}

impl From<OnnxError> for EmbedError {
    fn from(e: OnnxError) -> Self {
        EmbedError::Inference(e.to_string())
    }
}

/// Face box in original image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Mapping from the detector's letterboxed input back to the original frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD + ArcFace embedder.
pub struct OnnxEmbedder {
    detector: Session,
    recognizer: Session,
}

impl OnnxEmbedder {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let detector = load_session(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let outputs = detector.outputs().len();
        if outputs < 9 {
            return Err(EmbedError::Inference(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {outputs}"
            )));
        }
        let recognizer = load_session(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }

    /// Most confident face across all strides, if any clears the threshold.
    fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceBox>, OnnxError> {
        let (input, letterbox) = detector_input(image);
        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Positional layout: [0-2] scores, [3-5] boxes, [6-8] keypoints.
        let mut best: Option<FaceBox> = None;
        for (pos, &stride) in DETECTOR_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[pos].try_extract_tensor::<f32>()?;
            let (_, boxes) = outputs[pos + 3].try_extract_tensor::<f32>()?;
            if let Some(candidate) = best_anchor(scores, boxes, stride, &letterbox) {
                if best.map_or(true, |b| candidate.score > b.score) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    fn extract(&mut self, input: Array4<f32>) -> Result<Vec<f32>, OnnxError> {
        let outputs = self
            .recognizer
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        if raw.len() != EMBEDDING_DIM {
            return Err(OnnxError::Output(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(l2_normalize(raw.to_vec()))
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, image: &[u8]) -> Result<Option<Signature>, EmbedError> {
        let rgb = image::load_from_memory(image)
            .map_err(|e| EmbedError::Decode(e.to_string()))?
            .to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Ok(None);
        }

        let Some(face) = self.detect(&rgb)? else {
            return Ok(None);
        };
        tracing::debug!(score = face.score, x = face.x1, y = face.y1, "face detected");

        let Some(input) = recognizer_input(&rgb, &face) else {
            tracing::debug!("face box falls outside the frame");
            return Ok(None);
        };
        Ok(Some(Signature::new(self.extract(input)?)))
    }
}

fn load_session(path: &Path) -> Result<Session, EmbedError> {
    if !path.exists() {
        return Err(EmbedError::ModelNotFound(path.display().to_string()));
    }
    let build = || -> Result<Session, OnnxError> {
        Ok(Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?)
    };
    let session = build()?;
    tracing::info!(
        path = %path.display(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );
    Ok(session)
}

/// Letterbox the frame into the detector's square input, padding with the mean.
fn detector_input(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (DETECTOR_INPUT_SIZE as f32 / w as f32).min(DETECTOR_INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, DETECTOR_INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, DETECTOR_INPUT_SIZE);
    let pad_x = (DETECTOR_INPUT_SIZE - new_w) / 2;
    let pad_y = (DETECTOR_INPUT_SIZE - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Zero is the normalised mean, so untouched cells are padding.
    let size = DETECTOR_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (ty, tx) = ((y + pad_y) as usize, (x + pad_x) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Decode the highest-scoring anchor of one stride level.
fn best_anchor(scores: &[f32], boxes: &[f32], stride: usize, letterbox: &Letterbox) -> Option<FaceBox> {
    let (idx, score) = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, s)| s > DETECTOR_SCORE_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let offsets = boxes.get(idx * 4..idx * 4 + 4)?;
    let grid_w = DETECTOR_INPUT_SIZE as usize / stride;
    let cell = idx / ANCHORS_PER_CELL;
    let cx = ((cell % grid_w) * stride) as f32;
    let cy = ((cell / grid_w) * stride) as f32;
    let s = stride as f32;

    let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

    Some(FaceBox {
        x1: unmap_x(cx - offsets[0] * s),
        y1: unmap_y(cy - offsets[1] * s),
        x2: unmap_x(cx + offsets[2] * s),
        y2: unmap_y(cy + offsets[3] * s),
        score,
    })
}

/// Crop the face, resize to 112x112 and normalise into an NCHW tensor.
///
/// Returns `None` when the box has no overlap with the frame.
fn recognizer_input(image: &RgbImage, face: &FaceBox) -> Option<Array4<f32>> {
    let (w, h) = image.dimensions();
    let x1 = face.x1.max(0.0).floor() as u32;
    let y1 = face.y1.max(0.0).floor() as u32;
    let x2 = face.x2.min(w as f32).ceil().max(0.0) as u32;
    let y2 = face.y2.min(h as f32).ceil().max(0.0) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let crop = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    let aligned = imageops::resize(&crop, RECOGNIZER_INPUT_SIZE, RECOGNIZER_INPUT_SIZE, FilterType::Triangle);

    let size = RECOGNIZER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - RECOGNIZER_MEAN) / RECOGNIZER_STD;
        }
    }
    Some(tensor)
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
