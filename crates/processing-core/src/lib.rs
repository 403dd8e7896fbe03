//! Clipframe Processing Core: The Virtual Cinematographer
//!
//! Decides where the crop window of a reframed clip should sit:
//! - **Activity scan:** Cheap luma differencing splits the clip into shots
//! - **Adaptive sampling:** Spends face-detector calls only where shots move
//! - **Trajectory:** Springs a virtual camera between the detected anchors
//! - **Manual tracking:** Kalman-filters user-seeded tracks into anchors
//!
//! Frames and detections come in through the [`FrameSource`] and
//! [`FaceDetector`] traits; everything else is pure computation.

pub mod activity;
pub mod detection;
pub mod frame;
pub mod manual_track;
pub mod sampler;
pub mod trajectory;

pub use activity::{ActivityScan, ActivityScanner};
pub use detection::{FaceCandidate, FaceDetector};
pub use frame::{FrameSource, VideoFrame};
pub use manual_track::ManualTrackSmoother;
pub use sampler::{SamplerConfig, SamplerQuality, SceneSampler};
pub use trajectory::{sample, Mood, TrajectoryConfig, TrajectorySolver};
