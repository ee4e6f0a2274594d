//! Transport controller for recording and playback
//!
//! Single authority over which session is active: at most one capture
//! session, at most one playback session, never both. Holds a seek
//! requested before playback exists and applies it exactly once when the
//! next session opens. Republishes session state over an event channel on
//! a fixed 200 ms cadence.

use crate::audio::{
    waveform, AudioCapture, AudioPlayer, CaptureState, PlaybackState, RecordingStore,
    SharedCaptureState, SharedPlaybackState, SharedWaveform,
};
use crate::models::ConferenceRecord;
use crate::tokio_runtime;
use crate::transcription::TranscriptionClient;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cadence for level/position updates
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// State changes published to the presentation layer
#[derive(Debug)]
pub enum TransportEvent {
    /// Capture level meter and elapsed seconds
    Level { value: f32, elapsed: f64 },
    /// Playback position readout
    Position { seconds: f64, duration: f64 },
    RecordingStarted { path: PathBuf },
    RecordingFinished { record: ConferenceRecord },
    PlaybackStarted { duration: f64 },
    PlaybackPaused { position: f64 },
    PlaybackStopped,
    /// Natural end of stream
    PlaybackFinished,
    /// Result of an on-demand audio download
    DownloadFinished {
        file_name: String,
        result: Result<PathBuf, String>,
    },
    Status(String),
}

/// What a `play` call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayAction {
    Started,
    Paused,
    /// Backing file was missing; a download is in flight
    Fetching,
}

enum MonitorSource {
    Capture(SharedCaptureState),
    Playback(SharedPlaybackState),
}

/// Owns the active sessions and mediates user intents into them
pub struct TransportController {
    store: RecordingStore,
    client: TranscriptionClient,
    events: Sender<TransportEvent>,
    capture: Option<AudioCapture>,
    playback: Option<AudioPlayer>,
    selected: Option<ConferenceRecord>,
    /// Seek requested while no playback session existed; applied once
    pending_seek: Option<f64>,
    waveform: SharedWaveform,
    input_device: Option<u32>,
    output_device: Option<u32>,
    monitor_alive: Option<Arc<AtomicBool>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl TransportController {
    pub fn new(
        store: RecordingStore,
        client: TranscriptionClient,
        events: Sender<TransportEvent>,
    ) -> Self {
        Self {
            store,
            client,
            events,
            capture: None,
            playback: None,
            selected: None,
            pending_seek: None,
            waveform: SharedWaveform::new(),
            input_device: None,
            output_device: None,
            monitor_alive: None,
            monitor_handle: None,
        }
    }

    /// Set preferred input/output device nodes
    pub fn with_devices(mut self, input: Option<u32>, output: Option<u32>) -> Self {
        self.input_device = input;
        self.output_device = output;
        self
    }

    /// Waveform envelope of the selected recording
    pub fn waveform(&self) -> SharedWaveform {
        self.waveform.clone()
    }

    pub fn selected(&self) -> Option<&ConferenceRecord> {
        self.selected.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_some()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback
            .as_ref()
            .map(|p| p.playback_state())
            .unwrap_or(PlaybackState::Closed)
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    /// Seek to `seconds`, or remember the request if nothing is open yet
    ///
    /// With no open session the value is stored as the pending seek (last
    /// request wins) and applied right after the next session opens.
    pub fn request_seek(&mut self, seconds: f64) {
        let Some(player) = self.playback.as_mut() else {
            self.pending_seek = Some(seconds);
            return;
        };
        if player.playback_state() == PlaybackState::Closed {
            self.pending_seek = Some(seconds);
            return;
        }

        match player.seek(seconds) {
            Ok(applied) => {
                let duration = player.duration();
                let playing = player.playback_state() == PlaybackState::Playing;
                let shared = player.shared_state();
                let _ = self.events.send(TransportEvent::Position {
                    seconds: applied,
                    duration,
                });
                // Seeking restarts the stream; give it a fresh monitor
                if playing {
                    self.start_monitor(MonitorSource::Playback(shared));
                }
            }
            Err(e) => self.status(format!("Seek failed: {}", e)),
        }
    }

    /// Switch the selected recording, tearing down any active playback
    pub fn select_record(&mut self, record: ConferenceRecord) {
        self.stop_playback();

        let path = PathBuf::from(&record.file_path);
        if path.exists() {
            waveform::spawn_scan(path, self.waveform.clone());
        } else {
            self.waveform.clear();
        }

        info!("Selected record {}", record.title);
        self.selected = Some(record);
    }

    /// Start a new capture session
    ///
    /// Recording and playback are mutually exclusive; any open playback is
    /// stopped first.
    pub fn start_recording(&mut self) -> Result<PathBuf, String> {
        if self.capture.is_some() {
            return Err("Recording already in progress".to_string());
        }
        self.stop_playback();

        self.store
            .ensure_dir()
            .map_err(|e| format!("Failed to create recordings directory: {}", e))?;
        let path = self.store.generate_filename();

        let mut capture = AudioCapture::new();
        capture.start(self.input_device, &path)?;
        let shared = capture.shared_state();
        self.capture = Some(capture);

        self.start_monitor(MonitorSource::Capture(shared));
        let _ = self
            .events
            .send(TransportEvent::RecordingStarted { path: path.clone() });
        self.status("Recording...");
        Ok(path)
    }

    /// Stop the capture session and build the record for it
    pub fn stop_recording(&mut self) -> Result<ConferenceRecord, String> {
        let mut capture = self.capture.take().ok_or("Not recording")?;
        self.stop_monitor();

        let path = capture
            .output_path()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match capture.stop() {
            Ok(elapsed) => {
                let record =
                    ConferenceRecord::new(path.to_string_lossy().into_owned(), elapsed.as_secs_f64());
                let _ = self.events.send(TransportEvent::RecordingFinished {
                    record: record.clone(),
                });
                self.status("Recording complete");
                self.selected = Some(record.clone());
                Ok(record)
            }
            Err(e) => {
                // The partial file stays on disk
                warn!("Capture session failed: {}", e);
                self.status(format!("Recording failed: {}", e));
                Err(e)
            }
        }
    }

    /// Open a playback session for the selected record without starting it
    ///
    /// Constructs the decoder once and applies a pending seek exactly once.
    pub fn open_selected(&mut self) -> Result<f64, String> {
        let record = self.selected.clone().ok_or("No recording selected")?;
        let path = PathBuf::from(&record.file_path);

        if let Some(player) = self.playback.as_ref() {
            return Ok(player.duration());
        }

        let mut player = AudioPlayer::new();
        player.open(&path)?;
        if let Some(seconds) = self.pending_seek.take() {
            player.seek(seconds)?;
        }
        let duration = player.duration();
        self.playback = Some(player);
        Ok(duration)
    }

    /// Play or pause the selected record
    ///
    /// A missing backing file triggers a best-effort download instead; the
    /// result arrives as a `DownloadFinished` event.
    pub fn play(&mut self) -> Result<PlayAction, String> {
        if self.capture.is_some() {
            return Err("Stop recording before starting playback".to_string());
        }
        let record = self.selected.clone().ok_or("No recording selected")?;
        let path = PathBuf::from(&record.file_path);

        if !path.exists() {
            return Ok(self.fetch_missing_audio(&record));
        }

        if let Some(player) = self.playback.as_mut() {
            if player.playback_state() == PlaybackState::Playing {
                player.pause();
                self.stop_monitor();
                let position = player.position();
                let _ = self
                    .events
                    .send(TransportEvent::PlaybackPaused { position });
                return Ok(PlayAction::Paused);
            }
        }

        let duration = self.open_selected()?;
        if let Some(player) = self.playback.as_mut() {
            player.play(self.output_device)?;
            let shared = player.shared_state();
            self.start_monitor(MonitorSource::Playback(shared));
        }

        let _ = self
            .events
            .send(TransportEvent::PlaybackStarted { duration });
        Ok(PlayAction::Started)
    }

    /// Stop playback and release the session
    pub fn stop_playback(&mut self) {
        self.stop_monitor();
        if let Some(mut player) = self.playback.take() {
            player.stop();
            let _ = self.events.send(TransportEvent::PlaybackStopped);
        }
    }

    /// Close a session that reached end of stream
    pub fn finish_playback(&mut self) {
        self.stop_monitor();
        if let Some(mut player) = self.playback.take() {
            player.stop();
        }
    }

    /// Point the selected record at a freshly downloaded file
    pub fn update_selected_path(&mut self, path: &Path) {
        if let Some(record) = self.selected.as_mut() {
            record.file_path = path.to_string_lossy().into_owned();
        }
    }

    fn fetch_missing_audio(&mut self, record: &ConferenceRecord) -> PlayAction {
        let file_name = record.file_name();
        let dest_dir = self.store.recordings_dir().to_path_buf();
        let client = self.client.clone();
        let events = self.events.clone();

        self.status(format!("Fetching {} from server...", file_name));
        tokio_runtime::handle().spawn(async move {
            let result = client
                .download_audio(&file_name, &dest_dir)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(TransportEvent::DownloadFinished { file_name, result });
        });

        PlayAction::Fetching
    }

    fn start_monitor(&mut self, source: MonitorSource) {
        self.stop_monitor();

        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let events = self.events.clone();

        let handle = thread::spawn(move || match source {
            MonitorSource::Capture(state) => {
                while flag.load(Ordering::SeqCst) {
                    if state.state() != CaptureState::Capturing {
                        break;
                    }
                    let sent = events.send(TransportEvent::Level {
                        value: state.level(),
                        elapsed: state.duration(),
                    });
                    if sent.is_err() {
                        break;
                    }
                    thread::sleep(UPDATE_INTERVAL);
                }
            }
            MonitorSource::Playback(state) => {
                while flag.load(Ordering::SeqCst) {
                    if state.finished() {
                        let _ = events.send(TransportEvent::PlaybackFinished);
                        break;
                    }
                    // Updates are only published while still playing; a
                    // poll racing a stop is dropped here
                    if !state.is_playing() {
                        break;
                    }
                    let sent = events.send(TransportEvent::Position {
                        seconds: state.current_time(),
                        duration: state.duration(),
                    });
                    if sent.is_err() {
                        break;
                    }
                    thread::sleep(UPDATE_INTERVAL);
                }
            }
        });

        self.monitor_alive = Some(alive);
        self.monitor_handle = Some(handle);
    }

    fn stop_monitor(&mut self) {
        if let Some(alive) = self.monitor_alive.take() {
            alive.store(false, Ordering::SeqCst);
        }
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }
    }

    fn status(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Status(text.into()));
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn test_wav(tag: &str, seconds: f64) -> PathBuf {
        let dir = std::env::temp_dir().join("confab-transport");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.wav", tag));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(1000.0 * seconds) as usize {
            writer.write_sample(2000i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn controller(events: mpsc::Sender<TransportEvent>) -> TransportController {
        let store = RecordingStore::new()
            .with_recordings_dir(std::env::temp_dir().join("confab-transport"));
        let client =
            TranscriptionClient::new("http://localhost:8000", Duration::from_secs(5)).unwrap();
        TransportController::new(store, client, events)
    }

    fn record_for(path: &Path, seconds: f64) -> ConferenceRecord {
        ConferenceRecord::new(path.to_string_lossy().into_owned(), seconds)
    }

    #[test]
    fn test_seek_with_nothing_open_is_pending() {
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.request_seek(30.0);
        assert_eq!(transport.pending_seek(), Some(30.0));
        assert_eq!(transport.playback_state(), PlaybackState::Closed);
    }

    #[test]
    fn test_pending_seek_last_write_wins() {
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.request_seek(10.0);
        transport.request_seek(30.0);
        assert_eq!(transport.pending_seek(), Some(30.0));
    }

    #[test]
    fn test_pending_seek_applied_once_on_open() {
        let path = test_wav("pending", 60.0);
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.request_seek(30.0);
        transport.select_record(record_for(&path, 60.0));

        let duration = transport.open_selected().unwrap();
        assert!((duration - 60.0).abs() < 1e-9);
        assert_eq!(transport.pending_seek(), None);

        let position = transport.playback.as_ref().unwrap().position();
        assert!((position - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_seek_after_open_is_direct() {
        let path = test_wav("direct", 60.0);
        let (tx, rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.select_record(record_for(&path, 60.0));
        transport.open_selected().unwrap();

        transport.request_seek(45.0);
        assert_eq!(transport.pending_seek(), None);
        let position = transport.playback.as_ref().unwrap().position();
        assert!((position - 45.0).abs() < 1e-3);

        // The applied position is observable on the event channel
        let saw_position = rx
            .try_iter()
            .any(|e| matches!(e, TransportEvent::Position { seconds, .. } if (seconds - 45.0).abs() < 1e-3));
        assert!(saw_position);
    }

    #[test]
    fn test_pending_seek_not_reapplied() {
        let path = test_wav("once", 60.0);
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.request_seek(30.0);
        transport.select_record(record_for(&path, 60.0));
        transport.open_selected().unwrap();

        transport.request_seek(5.0);
        transport.stop_playback();
        transport.select_record(record_for(&path, 60.0));

        // A fresh open starts at zero; nothing pending is left over
        transport.open_selected().unwrap();
        let position = transport.playback.as_ref().unwrap().position();
        assert_eq!(position, 0.0);
    }

    #[test]
    fn test_select_record_tears_down_playback() {
        let first = test_wav("first", 10.0);
        let second = test_wav("second", 5.0);
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.select_record(record_for(&first, 10.0));
        transport.open_selected().unwrap();
        assert_eq!(transport.playback_state(), PlaybackState::Paused);

        transport.select_record(record_for(&second, 5.0));
        assert_eq!(transport.playback_state(), PlaybackState::Closed);
    }

    #[test]
    fn test_play_without_selection_errors() {
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);
        assert!(transport.play().is_err());
    }

    #[test]
    fn test_stop_recording_without_start_errors() {
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);
        assert!(transport.stop_recording().is_err());
    }

    #[test]
    fn test_seek_clamps_through_controller() {
        let path = test_wav("clamp", 10.0);
        let (tx, _rx) = mpsc::channel();
        let mut transport = controller(tx);

        transport.select_record(record_for(&path, 10.0));
        transport.open_selected().unwrap();

        transport.request_seek(15.0);
        let position = transport.playback.as_ref().unwrap().position();
        assert!((position - 10.0).abs() < 1e-3);

        transport.request_seek(-5.0);
        let position = transport.playback.as_ref().unwrap().position();
        assert_eq!(position, 0.0);
    }
}
