//! Audio capture, playback, and summarization using PipeWire
//!
//! This module provides:
//! - Microphone capture straight to flushed WAV files (44.1 kHz mono)
//! - WAV playback with pause/resume and seconds-based seeking
//! - Peak-envelope waveform scanning for visualization
//! - Device node enumeration

mod capture;
mod devices;
mod playback;
mod recorder;
pub mod waveform;

pub use capture::{calculate_peak, AudioCapture, CaptureState, SharedCaptureState};
pub use devices::{list_devices, AudioDevice, DeviceKind};
pub use playback::{AudioPlayer, PlaybackState, SharedPlaybackState};
pub use recorder::{RecordingStore, CAPTURE_SAMPLE_RATE};
pub use waveform::{AudioLevelSample, SharedWaveform};
