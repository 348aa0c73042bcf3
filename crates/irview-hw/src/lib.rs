//! irview-hw — V4L2 infrared capture.
//!
//! Exposes a Y16 infrared sensor as an [`irview_core::FrameSource`].

pub mod camera;
pub mod frame;

pub use camera::{CameraError, InfraredCamera};
pub use frame::Y16Frame;
