//! Scripted face analyzer
//!
//! Replays pre-recorded detections. Each call to `detect` pops the next
//! scripted frame; once the script is exhausted every call returns no faces.
//! Images can also be keyed by their dimensions so enrollment tests can
//! give different identities different embeddings.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;

use super::{DetectedFace, FaceAnalyzer};

enum Step {
    Faces(Vec<DetectedFace>),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Step>>,
    by_size: HashMap<(u32, u32), Vec<DetectedFace>>,
    calls: Mutex<usize>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the faces returned by the next `detect` call
    pub fn then(self, faces: Vec<DetectedFace>) -> Self {
        self.script.lock().push_back(Step::Faces(faces));
        self
    }

    /// Queue a failing `detect` call
    pub fn then_fail(self, message: &str) -> Self {
        self.script.lock().push_back(Step::Fail(message.to_string()));
        self
    }

    /// Return `faces` for any image of the given size, ahead of the script
    pub fn for_size(mut self, width: u32, height: u32, faces: Vec<DetectedFace>) -> Self {
        self.by_size.insert((width, height), faces);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        *self.calls.lock() += 1;

        if let Some(faces) = self.by_size.get(&image.dimensions()) {
            return Ok(faces.clone());
        }

        match self.script.lock().pop_front() {
            Some(Step::Faces(faces)) => Ok(faces),
            Some(Step::Fail(message)) => anyhow::bail!(message),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BoundingBox;

    #[test]
    fn test_script_order_then_empty() {
        let face = DetectedFace::new(BoundingBox { x1: 0, y1: 0, x2: 4, y2: 4 }, vec![1.0, 0.0]);
        let analyzer = ScriptedAnalyzer::new()
            .then(vec![face.clone()])
            .then_fail("engine offline");
        let image = DynamicImage::new_rgb8(8, 8);

        assert_eq!(analyzer.detect(&image).unwrap(), vec![face]);
        assert!(analyzer.detect(&image).is_err());
        assert!(analyzer.detect(&image).unwrap().is_empty());
        assert_eq!(analyzer.calls(), 3);
    }

    #[test]
    fn test_size_lookup_wins() {
        let face = DetectedFace::new(BoundingBox { x1: 0, y1: 0, x2: 4, y2: 4 }, vec![0.0, 1.0]);
        let analyzer = ScriptedAnalyzer::new().for_size(3, 2, vec![face.clone()]);

        assert_eq!(analyzer.detect(&DynamicImage::new_rgb8(3, 2)).unwrap(), vec![face]);
        assert!(analyzer.detect(&DynamicImage::new_rgb8(4, 4)).unwrap().is_empty());
    }
}
