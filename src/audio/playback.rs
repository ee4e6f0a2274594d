//! Audio playback using PipeWire
//!
//! Streams a decoded WAV file to the output with pause/resume and
//! seconds-based seeking. The session moves Closed -> Paused -> Playing
//! and back; natural end of stream marks the session finished so the
//! owner can close it.

#![allow(dead_code)]

use crate::audio::recorder::RecordingStore;
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Observable playback state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Closed,
    Paused,
    Playing,
}

/// Shared state for audio playback - thread-safe
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

struct PlaybackStateInner {
    samples: Vec<f32>,
    sample_rate: u32,
    /// Current playback position (sample index)
    position: usize,
    /// Total duration in seconds, fixed once the file is opened
    duration: f64,
    loaded: bool,
    is_playing: bool,
    /// Set when the stream drained to end-of-file
    finished: bool,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackStateInner {
                samples: Vec::new(),
                sample_rate: 44_100,
                position: 0,
                duration: 0.0,
                loaded: false,
                is_playing: false,
                finished: false,
            })),
        }
    }

    /// Load decoded audio for playback
    fn load(&self, samples: Vec<f32>, sample_rate: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.duration = samples.len() as f64 / sample_rate.max(1) as f64;
        inner.samples = samples;
        inner.sample_rate = sample_rate;
        inner.position = 0;
        inner.loaded = true;
        inner.is_playing = false;
        inner.finished = false;
    }

    /// Release the decoded audio
    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples = Vec::new();
        inner.position = 0;
        inner.duration = 0.0;
        inner.loaded = false;
        inner.is_playing = false;
        inner.finished = false;
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().unwrap().loaded
    }

    /// Current playback position in seconds
    pub fn current_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.position as f64 / inner.sample_rate.max(1) as f64
    }

    /// Total duration in seconds
    pub fn duration(&self) -> f64 {
        self.inner.lock().unwrap().duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().unwrap().sample_rate
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().is_playing
    }

    pub fn finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    fn set_playing(&self, playing: bool) {
        self.inner.lock().unwrap().is_playing = playing;
    }

    /// Move the position to `seconds`, clamped to `[0, duration]`
    ///
    /// Returns the position actually applied.
    fn seek_seconds(&self, seconds: f64) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        let clamped = seconds.clamp(0.0, inner.duration);
        let target = (clamped * inner.sample_rate as f64) as usize;
        inner.position = target.min(inner.samples.len());
        inner.finished = false;
        clamped
    }

    /// Get samples for the output stream, advancing the position
    fn get_samples(&self, count: usize) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.position >= inner.samples.len() {
            inner.is_playing = false;
            inner.finished = true;
            return None;
        }

        let end = (inner.position + count).min(inner.samples.len());
        let samples = inner.samples[inner.position..end].to_vec();
        inner.position = end;

        if inner.position >= inner.samples.len() {
            inner.is_playing = false;
            inner.finished = true;
        }

        Some(samples)
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio playback session using PipeWire
pub struct AudioPlayer {
    state: SharedPlaybackState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
    device: Option<u32>,
}

enum PlaybackCommand {
    Stop,
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self {
            state: SharedPlaybackState::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
            device: None,
        }
    }

    /// Get shared playback state for position readouts
    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    /// Decode the file once and return its total duration in seconds
    ///
    /// A session decodes exactly one file; repeated opens are no-ops.
    pub fn open(&mut self, path: &Path) -> Result<f64, String> {
        if self.state.is_loaded() {
            return Ok(self.state.duration());
        }

        let (samples, sample_rate) = RecordingStore::load(path)?;
        self.state.load(samples, sample_rate);
        Ok(self.state.duration())
    }

    pub fn playback_state(&self) -> PlaybackState {
        if !self.state.is_loaded() {
            PlaybackState::Closed
        } else if self.is_running.load(Ordering::SeqCst) {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    /// Current position in seconds
    pub fn position(&self) -> f64 {
        self.state.current_time()
    }

    /// Total duration in seconds
    pub fn duration(&self) -> f64 {
        self.state.duration()
    }

    /// True once the stream drained to end-of-file
    pub fn finished(&self) -> bool {
        !self.is_running.load(Ordering::SeqCst) && self.state.finished()
    }

    /// Start or resume playback, optionally targeting an output device node
    pub fn play(&mut self, device: Option<u32>) -> Result<(), String> {
        if !self.state.is_loaded() {
            return Err("No file loaded".to_string());
        }
        if self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.device = device;

        // Restart from the top after a completed run
        if self.state.finished() {
            self.state.seek_seconds(0.0);
        }

        self.state.set_playing(true);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        self.sender = Some(sender);

        let handle = thread::spawn(move || {
            if let Err(e) = run_playback_loop(state.clone(), device, receiver) {
                log::error!("Playback error: {}", e);
            }
            state.set_playing(false);
            is_running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Pause playback, keeping the position
    pub fn pause(&mut self) {
        if !self.is_running.load(Ordering::SeqCst) && self.thread_handle.is_none() {
            self.state.set_playing(false);
            return;
        }

        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.state.set_playing(false);
    }

    /// Seek to `seconds`, clamped to the file duration
    ///
    /// Repositioning while the stream is live is not safe, so a playing
    /// session is paused around the move and resumed afterwards. The
    /// clamped position is observable as soon as this returns.
    pub fn seek(&mut self, seconds: f64) -> Result<f64, String> {
        if !self.state.is_loaded() {
            return Err("No file loaded".to_string());
        }

        let was_playing = self.is_running.load(Ordering::SeqCst);
        if was_playing {
            self.pause();
        }

        let applied = self.state.seek_seconds(seconds);

        if was_playing {
            self.play(self.device)?;
        }
        Ok(applied)
    }

    /// Stop playback and release the decoded audio
    pub fn stop(&mut self) {
        self.pause();
        self.state.close();
    }
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.pause();
    }
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    device: Option<u32>,
    receiver: pw::channel::Receiver<PlaybackCommand>,
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
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
        mainloop_weak: mainloop.downgrade(),
    };

    let mut props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "Confab Conference Assistant",
    };
    if let Some(id) = device {
        props.insert(*pw::keys::TARGET_OBJECT, id.to_string());
    }

    let stream = pw::stream::StreamBox::new(&core, "confab-playback", props)
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
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * n_channels;

            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;
            let samples = user_data.state.get_samples(n_frames);

            match samples {
                Some(samples) => {
                    for (i, &sample) in samples.iter().enumerate() {
                        let offset = i * stride;
                        if offset + std::mem::size_of::<f32>() <= slice.len() {
                            let bytes = sample.to_le_bytes();
                            slice[offset..offset + 4].copy_from_slice(&bytes);
                            // If stereo, duplicate to second channel
                            if n_channels > 1 && offset + 8 <= slice.len() {
                                slice[offset + 4..offset + 8].copy_from_slice(&bytes);
                            }
                        }
                    }
                    let written = samples.len() * stride;
                    if written < slice.len() {
                        slice[written..].fill(0);
                    }

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = (samples.len() * stride) as u32;
                }
                None => {
                    // End of stream - stop the loop
                    if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    // Request F32LE at the file's sample rate
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(state.sample_rate());

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
            spa::utils::Direction::Output,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wav(tag: &str, sample_rate: u32, seconds: f64) -> PathBuf {
        let dir = std::env::temp_dir().join("confab-playback");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.wav", tag));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(sample_rate as f64 * seconds) as usize {
            writer.write_sample(4000i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_open_reports_duration() {
        let path = test_wav("duration", 1000, 10.0);
        let mut player = AudioPlayer::new();

        let duration = player.open(&path).unwrap();
        assert!((duration - 10.0).abs() < 1e-9);
        assert_eq!(player.playback_state(), PlaybackState::Paused);
    }

    #[test]
    fn test_open_is_lazy_once_per_file() {
        let path = test_wav("once", 1000, 2.0);
        let mut player = AudioPlayer::new();
        player.open(&path).unwrap();
        player.seek(1.0).unwrap();

        // A second open must not rewind or reload
        player.open(&path).unwrap();
        assert!((player.position() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_seek_clamps_past_end() {
        let path = test_wav("clamp-high", 1000, 10.0);
        let mut player = AudioPlayer::new();
        player.open(&path).unwrap();

        let applied = player.seek(15.0).unwrap();
        assert!((applied - 10.0).abs() < 1e-9);
        assert!((player.position() - 10.0).abs() < 1e-3);
        // Pause state unchanged by the seek
        assert_eq!(player.playback_state(), PlaybackState::Paused);
    }

    #[test]
    fn test_seek_clamps_negative_to_zero() {
        let path = test_wav("clamp-low", 1000, 10.0);
        let mut player = AudioPlayer::new();
        player.open(&path).unwrap();
        player.seek(5.0).unwrap();

        let applied = player.seek(-5.0).unwrap();
        assert_eq!(applied, 0.0);
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn test_seek_without_open_errors() {
        let mut player = AudioPlayer::new();
        assert!(player.seek(3.0).is_err());
    }

    #[test]
    fn test_stop_closes_session() {
        let path = test_wav("stop", 1000, 2.0);
        let mut player = AudioPlayer::new();
        player.open(&path).unwrap();
        player.seek(1.0).unwrap();

        player.stop();
        assert_eq!(player.playback_state(), PlaybackState::Closed);
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn test_drained_stream_marks_finished() {
        let state = SharedPlaybackState::new();
        state.load(vec![0.1f32; 100], 100);
        state.set_playing(true);

        assert!(state.get_samples(60).is_some());
        assert!(state.get_samples(60).is_some());
        assert!(state.get_samples(60).is_none());
        assert!(state.finished());
        assert!(!state.is_playing());
    }
}
