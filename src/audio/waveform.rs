//! Waveform summarization for recorded audio
//!
//! Produces a downsampled peak envelope of a WAV file for visualization:
//! the file is read one second at a time and each 500-sample stride is
//! reduced to its maximum absolute magnitude.

use log::{debug, error};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Samples per emitted peak value
pub const PEAK_STRIDE: usize = 500;

/// One downsampled peak value of the envelope
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioLevelSample {
    /// Sequence position, contiguous from 0 across the whole file
    pub index: usize,
    /// Peak magnitude in [0, 1]
    pub value: f32,
}

/// Shared handle to the most recently published envelope - thread-safe
///
/// A scan publishes its full result in one swap so readers never observe
/// a partially built envelope.
#[derive(Clone, Default)]
pub struct SharedWaveform {
    inner: Arc<Mutex<Vec<AudioLevelSample>>>,
}

impl SharedWaveform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<AudioLevelSample> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn publish(&self, samples: Vec<AudioLevelSample>) {
        *self.inner.lock().unwrap() = samples;
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// Scan a WAV file into its peak envelope
///
/// Reads one-second blocks of decoded mono samples and emits one peak per
/// 500-sample stride. Indices increment across block boundaries.
pub fn scan_file(path: impl AsRef<Path>) -> Result<Vec<AudioLevelSample>, String> {
    let reader = hound::WavReader::open(path.as_ref())
        .map_err(|e| format!("Failed to open WAV file: {}", e))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let block_len = spec.sample_rate.max(1) as usize;

    let mut frames: Box<dyn Iterator<Item = Result<f32, hound::Error>>> = match spec.sample_format {
        hound::SampleFormat::Float => Box::new(reader.into_samples::<f32>()),
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            Box::new(
                reader
                    .into_samples::<i32>()
                    .map(move |s| s.map(|v| v as f32 / max_value)),
            )
        }
    };

    let mut envelope = Vec::new();
    let mut block = Vec::with_capacity(block_len);
    let mut index = 0;

    loop {
        // One mono sample per frame, downmixing interleaved channels
        let mut frame_sum = 0.0f32;
        let mut frame_read = 0;
        for _ in 0..channels {
            match frames.next() {
                Some(sample) => {
                    frame_sum +=
                        sample.map_err(|e| format!("Failed to decode samples: {}", e))?;
                    frame_read += 1;
                }
                None => break,
            }
        }

        if frame_read > 0 {
            block.push(frame_sum / frame_read as f32);
        }

        let exhausted = frame_read == 0;
        if block.len() == block_len || (exhausted && !block.is_empty()) {
            emit_block_peaks(&block, &mut envelope, &mut index);
            block.clear();
        }

        if exhausted {
            break;
        }
    }

    Ok(envelope)
}

fn emit_block_peaks(block: &[f32], envelope: &mut Vec<AudioLevelSample>, index: &mut usize) {
    for stride in block.chunks(PEAK_STRIDE) {
        let peak = stride.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        envelope.push(AudioLevelSample {
            index: *index,
            value: peak.min(1.0),
        });
        *index += 1;
    }
}

/// Scan a file off the interactive path and publish the result
///
/// Decode errors are logged and leave the published waveform empty; they
/// are never surfaced to the caller.
pub fn spawn_scan(path: PathBuf, shared: SharedWaveform) -> JoinHandle<()> {
    thread::spawn(move || match scan_file(&path) {
        Ok(envelope) => {
            debug!(
                "Waveform scan of {} produced {} peaks",
                path.display(),
                envelope.len()
            );
            shared.publish(envelope);
        }
        Err(e) => {
            error!("Waveform scan of {} failed: {}", path.display(), e);
            shared.clear();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn test_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("confab-waveform");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{}.wav", tag))
    }

    #[test]
    fn test_indices_contiguous_across_blocks() {
        // 2.5 "seconds" at a 1000 Hz block size: blocks of 1000, 1000, 500
        let path = test_path("contiguous");
        write_test_wav(&path, 1000, &vec![1000i16; 2500]);

        let envelope = scan_file(&path).unwrap();
        assert_eq!(envelope.len(), 5);
        for (i, sample) in envelope.iter().enumerate() {
            assert_eq!(sample.index, i);
        }
    }

    #[test]
    fn test_scan_is_idempotent() {
        let path = test_path("idempotent");
        let samples: Vec<i16> = (0..2300).map(|i| ((i * 37) % 1200 - 600) as i16).collect();
        write_test_wav(&path, 1000, &samples);

        let first = scan_file(&path).unwrap();
        let second = scan_file(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_stride_peaks() {
        // First stride quiet, second stride loud
        let path = test_path("peaks");
        let mut samples = vec![100i16; PEAK_STRIDE];
        samples.extend(vec![-20000i16; PEAK_STRIDE]);
        write_test_wav(&path, 1000, &samples);

        let envelope = scan_file(&path).unwrap();
        assert_eq!(envelope.len(), 2);
        assert!(envelope[0].value < 0.01);
        assert!((envelope[1].value - 20000.0 / 32768.0).abs() < 1e-4);
    }

    #[test]
    fn test_values_bounded() {
        let path = test_path("bounded");
        write_test_wav(&path, 1000, &[i16::MIN; 600]);

        let envelope = scan_file(&path).unwrap();
        assert!(envelope.iter().all(|s| (0.0..=1.0).contains(&s.value)));
    }

    #[test]
    fn test_missing_file_reports_error() {
        assert!(scan_file("/nonexistent/confab.wav").is_err());
    }

    #[test]
    fn test_shared_waveform_publish_replaces() {
        let shared = SharedWaveform::new();
        shared.publish(vec![AudioLevelSample {
            index: 0,
            value: 0.5,
        }]);
        assert_eq!(shared.len(), 1);

        shared.publish(vec![
            AudioLevelSample {
                index: 0,
                value: 0.1,
            },
            AudioLevelSample {
                index: 1,
                value: 0.2,
            },
        ]);
        let samples = shared.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].index, 1);
    }
}
