//! Audio capture using PipeWire
//!
//! Records microphone input straight to a WAV file with a live level meter.
//! Each delivered buffer is appended and flushed before the next arrives.

use crate::audio::recorder::CAPTURE_SAMPLE_RATE;
use hound::{WavSpec, WavWriter};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Current state of audio capture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Error,
}

type CaptureWriter = WavWriter<BufWriter<File>>;

/// Shared state for audio capture - thread-safe
#[derive(Clone)]
pub struct SharedCaptureState {
    inner: Arc<Mutex<CaptureStateInner>>,
}

struct CaptureStateInner {
    /// Peak magnitude of the most recent buffer (0.0 - 1.0)
    level: f32,
    /// Seconds of audio written so far
    duration: f64,
    /// Frames written to the file
    frames_written: u64,
    state: CaptureState,
    error: Option<String>,
    writer: Option<CaptureWriter>,
}

impl SharedCaptureState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureStateInner {
                level: 0.0,
                duration: 0.0,
                frames_written: 0,
                state: CaptureState::Idle,
                error: None,
                writer: None,
            })),
        }
    }

    pub fn level(&self) -> f32 {
        self.inner.lock().unwrap().level
    }

    pub fn duration(&self) -> f64 {
        self.inner.lock().unwrap().duration
    }

    pub fn frames_written(&self) -> u64 {
        self.inner.lock().unwrap().frames_written
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().unwrap().state
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn set_state(&self, state: CaptureState) {
        self.inner.lock().unwrap().state = state;
    }

    pub fn set_error(&self, error: String) {
        let mut inner = self.inner.lock().unwrap();
        inner.error = Some(error);
        inner.state = CaptureState::Error;
    }

    /// Install the file writer and reset per-session metrics
    fn begin(&self, writer: CaptureWriter) {
        let mut inner = self.inner.lock().unwrap();
        inner.writer = Some(writer);
        inner.level = 0.0;
        inner.duration = 0.0;
        inner.frames_written = 0;
        inner.error = None;
        inner.state = CaptureState::Capturing;
    }

    /// Append one delivered buffer to the file and update the level meter
    ///
    /// Called from the stream's data path; a write failure flips the session
    /// into the error state and keeps the partial file on disk.
    fn write_samples(&self, samples: &[f32]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CaptureState::Capturing {
            return;
        }
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let mut failure = None;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            if let Err(e) = writer.write_sample(value) {
                failure = Some(format!("Failed to write sample: {}", e));
                break;
            }
        }
        if failure.is_none() {
            if let Err(e) = writer.flush() {
                failure = Some(format!("Failed to flush recording: {}", e));
            }
        }

        if let Some(message) = failure {
            // Drop the writer but leave the partial file on disk
            drop(inner.writer.take());
            inner.error = Some(message);
            inner.state = CaptureState::Error;
            return;
        }

        inner.frames_written += samples.len() as u64;
        inner.duration = inner.frames_written as f64 / CAPTURE_SAMPLE_RATE as f64;
        inner.level = calculate_peak(samples);
    }

    /// Finalize and close the file writer
    fn finish(&self) -> Result<(), String> {
        let writer = self.inner.lock().unwrap().writer.take();
        match writer {
            Some(writer) => writer
                .finalize()
                .map_err(|e| format!("Failed to finalize WAV file: {}", e)),
            None => Ok(()),
        }
    }
}

impl Default for SharedCaptureState {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio capture session using PipeWire
pub struct AudioCapture {
    state: SharedCaptureState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<CaptureCommand>>,
    started_at: Option<Instant>,
    output_path: Option<PathBuf>,
}

enum CaptureCommand {
    Stop,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self {
            state: SharedCaptureState::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
            started_at: None,
            output_path: None,
        }
    }

    /// Get shared capture state for level/duration readouts
    pub fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Start capturing to `output_path`, optionally targeting a device node
    ///
    /// Opens the file writer synchronously; device failures surface through
    /// the shared state once the stream thread reports them.
    pub fn start(&mut self, device: Option<u32>, output_path: &Path) -> Result<(), String> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err("Capture already running".to_string());
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(output_path, spec)
            .map_err(|e| format!("Failed to create {}: {}", output_path.display(), e))?;

        self.state.begin(writer);
        self.is_running.store(true, Ordering::SeqCst);
        self.started_at = Some(Instant::now());
        self.output_path = Some(output_path.to_path_buf());

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<CaptureCommand>();
        self.sender = Some(sender);

        let handle = thread::spawn(move || {
            if let Err(e) = run_capture_loop(state.clone(), device, receiver) {
                state.set_error(e);
                // Keep whatever was written before the failure
                let _ = state.finish();
            }
            is_running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing and return the elapsed wall-clock duration
    pub fn stop(&mut self) -> Result<Duration, String> {
        if self.thread_handle.is_none() {
            return Err("Capture not running".to_string());
        }

        if let Some(sender) = self.sender.take() {
            let _ = sender.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.is_running.store(false, Ordering::SeqCst);

        let elapsed = self
            .started_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();

        let finalize = self.state.finish();
        match self.state.error() {
            Some(e) => Err(e),
            None => {
                finalize?;
                self.state.set_state(CaptureState::Idle);
                Ok(elapsed)
            }
        }
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            let _ = self.stop();
        }
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    state: SharedCaptureState,
    device: Option<u32>,
    receiver: pw::channel::Receiver<CaptureCommand>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        CaptureCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
    };

    let mut props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "Confab Conference Assistant",
    };
    if let Some(id) = device {
        props.insert(*pw::keys::TARGET_OBJECT, id.to_string());
    }

    let stream = pw::stream::StreamBox::new(&core, "confab-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            user_data
                .format
                .parse(param)
                .expect("Failed to parse audio format");
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1);
            let n_samples = data.chunk().size() / (std::mem::size_of::<f32>() as u32);

            if let Some(raw_samples) = data.data() {
                let mut mono_samples = Vec::with_capacity((n_samples / n_channels) as usize);

                for i in (0..n_samples).step_by(n_channels as usize) {
                    let start = i as usize * std::mem::size_of::<f32>();
                    let end = start + std::mem::size_of::<f32>();
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        mono_samples.push(sample);
                    }
                }

                user_data.state.write_samples(&mono_samples);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    // Fixed capture format: F32LE, mono, 44.1 kHz
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(CAPTURE_SAMPLE_RATE);
    audio_info.set_channels(1);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values).unwrap()];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    mainloop.run();

    Ok(())
}

/// Peak magnitude of a buffer
pub fn calculate_peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("confab-capture");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{}.wav", tag))
    }

    fn writer_for(path: &Path) -> CaptureWriter {
        let spec = WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        WavWriter::create(path, spec).unwrap()
    }

    #[test]
    fn test_calculate_peak() {
        assert_eq!(calculate_peak(&[]), 0.0);
        assert_eq!(calculate_peak(&[0.1, -0.8, 0.3]), 0.8);
        assert_eq!(calculate_peak(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_write_samples_updates_level_and_duration() {
        let path = temp_wav("level");
        let state = SharedCaptureState::new();
        state.begin(writer_for(&path));

        let buffer = vec![0.25f32; CAPTURE_SAMPLE_RATE as usize / 2];
        state.write_samples(&buffer);

        assert_eq!(state.state(), CaptureState::Capturing);
        assert!((state.level() - 0.25).abs() < 1e-6);
        assert!((state.duration() - 0.5).abs() < 1e-9);

        state.finish().unwrap();
    }

    #[test]
    fn test_file_nonempty_after_one_buffer() {
        let path = temp_wav("nonempty");
        let state = SharedCaptureState::new();
        state.begin(writer_for(&path));
        state.write_samples(&[0.5f32; 1024]);
        state.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 1024);
    }

    #[test]
    fn test_write_after_finish_is_ignored() {
        let path = temp_wav("after-finish");
        let state = SharedCaptureState::new();
        state.begin(writer_for(&path));
        state.write_samples(&[0.1f32; 10]);
        state.finish().unwrap();

        // A late callback must no-op once the writer is gone
        state.set_state(CaptureState::Idle);
        state.write_samples(&[0.9f32; 10]);
        assert_eq!(state.frames_written(), 10);
    }

    #[test]
    fn test_stop_without_start_errors() {
        let mut capture = AudioCapture::new();
        assert!(capture.stop().is_err());
    }
}
