//! Recognition pipeline: matching, frame loop and enrollment capture

pub mod enroll_capture;
pub mod frame_loop;
pub mod matcher;
pub mod source;
pub mod types;

pub use enroll_capture::{CaptureSummary, EnrollmentCapture};
pub use frame_loop::{FrameProcessor, FrameReport, OverlayLabel, OverlayWriter, RunSummary};
pub use matcher::{IdentityMatcher, Threshold};
pub use source::{FrameSource, ImageSequenceSource, VecSource};
pub use types::*;
