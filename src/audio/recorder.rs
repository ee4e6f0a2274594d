//! Recording file management using hound
//!
//! Owns the recordings directory and the WAV format used for capture
//! (44.1 kHz mono, 16-bit PCM).

use hound::WavSpec;
use std::path::{Path, PathBuf};

/// Capture sample rate shared by the input stream and the WAV writer
pub const CAPTURE_SAMPLE_RATE: u32 = 44_100;

/// Store for recording files on disk
pub struct RecordingStore {
    spec: WavSpec,
    recordings_dir: PathBuf,
}

impl RecordingStore {
    pub fn new() -> Self {
        let spec = WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let recordings_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("confab")
            .join("recordings");

        Self {
            spec,
            recordings_dir,
        }
    }

    /// Set the recordings directory
    pub fn with_recordings_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.recordings_dir = dir.as_ref().to_path_buf();
        self
    }

    /// WAV format used for new recordings
    pub fn wav_spec(&self) -> WavSpec {
        self.spec
    }

    /// Get the recordings directory
    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Ensure the recordings directory exists
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.recordings_dir)
    }

    /// Path for a new recording: `recording_{yyyyMMdd_HHmmss}.wav`
    pub fn generate_filename(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.recordings_dir
            .join(format!("recording_{}.wav", timestamp))
    }

    /// Path a file with the given name would have inside the store
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.recordings_dir.join(file_name)
    }

    /// Copy an external audio file into the recordings directory
    ///
    /// Returns the path of the stored copy
    pub fn import(&self, source: &Path) -> Result<PathBuf, String> {
        self.ensure_dir()
            .map_err(|e| format!("Failed to create recordings directory: {}", e))?;

        let file_name = source
            .file_name()
            .ok_or_else(|| format!("Not a file: {}", source.display()))?;
        let target = self.recordings_dir.join(file_name);

        if source != target {
            std::fs::copy(source, &target)
                .map_err(|e| format!("Failed to copy {}: {}", source.display(), e))?;
        }

        Ok(target)
    }

    /// Load samples from a WAV file
    ///
    /// Returns mono f32 samples and the sample rate
    pub fn load(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32), String> {
        let reader = hound::WavReader::open(path.as_ref())
            .map_err(|e| format!("Failed to open WAV file: {}", e))?;

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;
        let channels = spec.channels as usize;

        let samples: Result<Vec<f32>, _> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect(),
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                let max_value = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect()
            }
        };

        let samples = samples.map_err(|e| format!("Failed to read samples: {}", e))?;

        // Downmix interleaved channels
        let mono = if channels > 1 {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            samples
        };

        Ok((mono, sample_rate))
    }

    /// Probe the real duration of an audio file via the decoder
    pub fn probe_duration(path: impl AsRef<Path>) -> Result<f64, String> {
        let reader = hound::WavReader::open(path.as_ref())
            .map_err(|e| format!("Failed to open WAV file: {}", e))?;
        let spec = reader.spec();
        let frames = reader.duration();
        Ok(frames as f64 / spec.sample_rate as f64)
    }

    /// Get duration of samples in seconds
    pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
        sample_count as f64 / sample_rate as f64
    }

    /// List all recordings in the recordings directory, newest first
    pub fn list_recordings(&self) -> Result<Vec<PathBuf>, String> {
        self.ensure_dir()
            .map_err(|e| format!("Failed to access recordings directory: {}", e))?;

        let mut recordings: Vec<PathBuf> = std::fs::read_dir(&self.recordings_dir)
            .map_err(|e| format!("Failed to read recordings directory: {}", e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase() == "wav")
                    .unwrap_or(false)
            })
            .collect();

        recordings.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        Ok(recordings)
    }
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("confab-recorder-{}", tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_test_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = WavSpec {
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

    #[test]
    fn test_duration_calculation() {
        assert_eq!(RecordingStore::duration_seconds(44100, 44100), 1.0);
        assert_eq!(RecordingStore::duration_seconds(88200, 44100), 2.0);
        assert_eq!(RecordingStore::duration_seconds(22050, 44100), 0.5);
    }

    #[test]
    fn test_generated_filename_format() {
        let store = RecordingStore::new().with_recordings_dir("/tmp/rec");
        let path = store.generate_filename();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        // recording_YYYYMMDD_HHMMSS.wav
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".wav"));
        let stamp = &name["recording_".len()..name.len() - ".wav".len()];
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert!(stamp
            .chars()
            .enumerate()
            .all(|(i, c)| i == 8 || c.is_ascii_digit()));
    }

    #[test]
    fn test_probe_duration() {
        let dir = temp_dir("probe");
        let path = dir.join("two_seconds.wav");
        write_test_wav(&path, 8000, &vec![0i16; 16000]);

        let duration = RecordingStore::probe_duration(&path).unwrap();
        assert!((duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_int_samples_normalized() {
        let dir = temp_dir("load");
        let path = dir.join("peaks.wav");
        write_test_wav(&path, 8000, &[0, i16::MAX, i16::MIN, 0]);

        let (samples, rate) = RecordingStore::load(&path).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 4);
        assert!(samples[1] > 0.99 && samples[1] <= 1.0);
        assert!((-1.0..=-0.99).contains(&samples[2]));
    }

    #[test]
    fn test_import_copies_into_store() {
        let src_dir = temp_dir("import-src");
        let dst_dir = temp_dir("import-dst");
        let source = src_dir.join("external.wav");
        write_test_wav(&source, 8000, &[0i16; 10]);

        let store = RecordingStore::new().with_recordings_dir(&dst_dir);
        let stored = store.import(&source).unwrap();

        assert_eq!(stored, dst_dir.join("external.wav"));
        assert!(stored.exists());
    }
}
