//! InsightFace analyzer on OpenVINO
//!
//! SCRFD (`det_10g`) for boxes and 5-point landmarks, ArcFace for 512-d
//! embeddings. Models are read and compiled once in `new`.

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::preprocess::{align_face, letterbox, to_nchw_bgr, ResizeInfo, DETECTOR_INPUT_SIZE};
use super::{BoundingBox, DetectedFace, FaceAnalyzer};
use crate::config::EngineConfig;

const NMS_THRESHOLD: f32 = 0.4;

/// OpenVINO handles are thread-safe in C++ but the bindings do not mark them so
struct Compiled(CompiledModel);
unsafe impl Send for Compiled {}

struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: [(f32, f32); 5],
}

impl Candidate {
    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = (self.x2 - self.x1) * (self.y2 - self.y1)
            + (other.x2 - other.x1) * (other.y2 - other.y1)
            - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

pub struct InsightFaceAnalyzer {
    detector: Mutex<Compiled>,
    embedder: Mutex<Compiled>,
    confidence_threshold: f32,
}

impl InsightFaceAnalyzer {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut core = Core::new()?;
        let detector = compile(&mut core, &config.detector, &config.device)?;
        let embedder = compile(&mut core, &config.embedder, &config.device)?;

        Ok(Self {
            detector: Mutex::new(Compiled(detector)),
            embedder: Mutex::new(Compiled(embedder)),
            confidence_threshold: config.detection_confidence,
        })
    }

    fn run_detector(&self, image: &DynamicImage) -> Result<Vec<Candidate>> {
        let (canvas, resize_info) = letterbox(image, DETECTOR_INPUT_SIZE);
        let input = to_nchw_bgr(&canvas);

        let mut request = self.detector.lock().0.create_infer_request()?;
        set_input(&mut request, &input)?;
        request.infer()?;

        let candidates = self.decode_scrfd(&request, &resize_info)?;
        Ok(nms(candidates))
    }

    /// Decode SCRFD outputs: scores, box distances and keypoint offsets per stride
    fn decode_scrfd(&self, request: &InferRequest, resize_info: &ResizeInfo) -> Result<Vec<Candidate>> {
        let output_count = (0..16)
            .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
            .count();

        let (fmc, use_kps, num_anchors) = match output_count {
            6 => (3, false, 2),
            9 => (3, true, 2),
            10 => (5, false, 1),
            15 => (5, true, 1),
            other => {
                warn!("Unexpected SCRFD output count {}, assuming det_10g layout", other);
                (3, true, 2)
            }
        };
        let strides: &[usize] = if fmc == 3 { &[8, 16, 32] } else { &[8, 16, 32, 64, 128] };
        let (input_w, input_h) = (DETECTOR_INPUT_SIZE.0 as usize, DETECTOR_INPUT_SIZE.1 as usize);

        let mut candidates = Vec::new();
        for (idx, &stride) in strides.iter().enumerate() {
            let scores = read_f32(&request.get_output_tensor_by_index(idx)?)?;
            let boxes = read_f32(&request.get_output_tensor_by_index(idx + fmc)?)?;
            let kps = if use_kps {
                Some(read_f32(&request.get_output_tensor_by_index(idx + fmc * 2)?)?)
            } else {
                None
            };

            let (feat_w, feat_h) = (input_w / stride, input_h / stride);
            let s = stride as f32;
            for anchor in 0..feat_w * feat_h * num_anchors {
                let score = match scores.get(anchor) {
                    Some(&score) if score >= self.confidence_threshold => score,
                    _ => continue,
                };
                let Some(d) = boxes.get(anchor * 4..anchor * 4 + 4) else {
                    continue;
                };
                let cell = anchor / num_anchors;
                let cx = (cell % feat_w) as f32 * s;
                let cy = (cell / feat_w) as f32 * s;

                let (x1, y1) = resize_info.to_original(cx - d[0] * s, cy - d[1] * s);
                let (x2, y2) = resize_info.to_original(cx + d[2] * s, cy + d[3] * s);

                let mut landmarks = [(0.0f32, 0.0f32); 5];
                if let Some(k) = kps.as_ref().and_then(|k| k.get(anchor * 10..anchor * 10 + 10)) {
                    for (j, point) in landmarks.iter_mut().enumerate() {
                        *point = resize_info.to_original(cx + k[j * 2] * s, cy + k[j * 2 + 1] * s);
                    }
                }

                candidates.push(Candidate { x1, y1, x2, y2, score, landmarks });
            }
        }

        debug!("SCRFD produced {} candidates before NMS", candidates.len());
        Ok(candidates)
    }

    fn embed(&self, image: &DynamicImage, landmarks: &[(f32, f32); 5]) -> Result<Vec<f32>> {
        let aligned = align_face(image, landmarks);
        let input = to_nchw_bgr(&aligned);

        let mut request = self.embedder.lock().0.create_infer_request()?;
        set_input(&mut request, &input)?;
        request.infer()?;

        read_f32(&request.get_output_tensor()?)
    }
}

impl FaceAnalyzer for InsightFaceAnalyzer {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let (width, height) = image.dimensions();
        let mut faces = Vec::new();

        for candidate in self.run_detector(image)? {
            let Some(bbox) = BoundingBox::from_f32(candidate.x1, candidate.y1, candidate.x2, candidate.y2) else {
                continue;
            };
            let embedding = self.embed(image, &candidate.landmarks)?;
            faces.push(DetectedFace {
                bbox,
                embedding,
                confidence: candidate.score,
            });
        }

        debug!("Detected {} faces in {}x{} image", faces.len(), width, height);
        Ok(faces)
    }
}

fn compile(core: &mut Core, path: &Path, device: &str) -> Result<CompiledModel> {
    let path_str = path
        .to_str()
        .with_context(|| format!("Model path is not UTF-8: {}", path.display()))?;
    info!("Loading model {} on {}", path_str, device);
    let model = core
        .read_model_from_file(path_str, "")
        .with_context(|| format!("Failed to read model {}", path_str))?;
    let compiled = core.compile_model(&model, device.into())?;
    Ok(compiled)
}

fn set_input(request: &mut InferRequest, input: &ndarray::Array4<f32>) -> Result<()> {
    let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let shape = Shape::new(&dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &shape)?;

    let data = input
        .as_slice()
        .context("Input tensor is not contiguous")?;
    let raw = tensor.get_raw_data_mut()?;
    for (chunk, value) in raw.chunks_exact_mut(4).zip(data.iter()) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }

    request.set_input_tensor(&tensor)?;
    Ok(())
}

fn read_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let raw = tensor.get_raw_data()?;
    Ok(raw
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Greedy non-maximum suppression by score
fn nms(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|kept| kept.iou(&candidate) <= NMS_THRESHOLD) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, score: f32) -> Candidate {
        Candidate {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            score,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(vec![candidate(0.0, 0.6), candidate(1.0, 0.9), candidate(50.0, 0.7)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }
}
