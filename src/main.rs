//! Confab - A conference recording and transcription assistant for Linux
//!
//! This is the main entry point for the Confab application.

mod audio;
mod cli;
mod models;
mod settings;
mod state;
mod tokio_runtime;
mod transcription;
mod transport;

use anyhow::{anyhow, Context, Result};
use audio::{waveform, DeviceKind, RecordingStore};
use clap::Parser;
use cli::Command;
use log::{info, warn};
use models::{format_hms, ConferenceRecord, TranscriptSegment};
use settings::Settings;
use state::RecordsDatabase;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use transcription::TranscriptionClient;
use transport::{PlayAction, TransportController, TransportEvent};

fn main() {
    let args = cli::Args::parse();
    cli::init_logging(&args);
    tokio_runtime::init();

    info!("Starting Confab conference assistant");

    let settings = Settings::load_or_init();
    let result = match args.command {
        Command::Record {
            seconds,
            transcribe,
        } => run_record(&settings, seconds, transcribe),
        Command::Play { file, seek } => run_play(&settings, file, seek),
        Command::Transcribe { file } => run_transcribe(&settings, &file),
        Command::Records { sync } => run_records(&settings, sync),
        Command::Show { index, fetch } => run_show(&settings, index, fetch),
        Command::Waveform { file } => run_waveform(&file),
        Command::Devices => run_devices(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn recording_store(settings: &Settings) -> RecordingStore {
    match &settings.recordings_dir {
        Some(dir) => RecordingStore::new().with_recordings_dir(dir),
        None => RecordingStore::new(),
    }
}

fn make_client(settings: &Settings) -> Result<TranscriptionClient> {
    TranscriptionClient::new(&settings.api_base_url, settings.timeout())
}

fn make_transport(
    settings: &Settings,
    events: mpsc::Sender<TransportEvent>,
) -> Result<TransportController> {
    let store = recording_store(settings);
    let client = make_client(settings)?;
    Ok(TransportController::new(store, client, events)
        .with_devices(settings.input_device, settings.output_device))
}

fn run_record(settings: &Settings, seconds: Option<u64>, transcribe: bool) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut transport = make_transport(settings, tx)?;

    let path = transport.start_recording().map_err(|e| anyhow!(e))?;
    println!("Recording to {}", path.display());

    let (stop_tx, stop_rx) = mpsc::channel();
    match seconds {
        Some(secs) => {
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                let _ = stop_tx.send(());
            });
        }
        None => {
            println!("Press Enter to stop.");
            thread::spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
                let _ = stop_tx.send(());
            });
        }
    }

    while stop_rx.try_recv().is_err() && transport.is_recording() {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(TransportEvent::Level { value, elapsed }) => {
                print!("\r  {}  level {:>5.2}", format_hms(elapsed), value);
                let _ = std::io::stdout().flush();
            }
            Ok(TransportEvent::Status(status)) => info!("{}", status),
            Ok(_) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    println!();

    let record = transport.stop_recording().map_err(|e| anyhow!(e))?;
    println!(
        "Saved {} ({})",
        record.file_path,
        record.display_duration()
    );

    let database = RecordsDatabase::new();
    let mut records = database.load().map_err(|e| anyhow!(e))?;
    database
        .add_record(record.clone(), &mut records)
        .map_err(|e| anyhow!(e))?;

    if transcribe {
        let client = make_client(settings)?;
        transcribe_record(&client, &database, &mut records, record)?;
    }

    Ok(())
}

fn run_play(settings: &Settings, file: PathBuf, seek: Option<f64>) -> Result<()> {
    let store = recording_store(settings);
    let path = if file.exists() {
        file
    } else {
        // Fall back to a file name inside the store; if it is not there
        // either, the transport will try the backend
        store.path_for(&file.to_string_lossy())
    };

    let duration = if path.exists() {
        RecordingStore::probe_duration(&path).unwrap_or(0.0)
    } else {
        0.0
    };
    let record = ConferenceRecord::new(path.to_string_lossy().into_owned(), duration);

    let (tx, rx) = mpsc::channel();
    let mut transport = make_transport(settings, tx)?;

    // A seek before the session exists is remembered and applied on open
    if let Some(position) = seek {
        transport.request_seek(position);
    }
    transport.select_record(record);

    match transport.play().map_err(|e| anyhow!(e))? {
        PlayAction::Started => {}
        PlayAction::Paused => {}
        PlayAction::Fetching => println!("Local copy missing, fetching from server..."),
    }

    // Leave room for a slow on-demand download before giving up
    let idle_timeout = settings.timeout().max(Duration::from_secs(30));
    loop {
        match rx.recv_timeout(idle_timeout) {
            Ok(TransportEvent::Position { seconds, duration }) => {
                print!("\r  {} / {}", format_hms(seconds), format_hms(duration));
                let _ = std::io::stdout().flush();
            }
            Ok(TransportEvent::PlaybackStarted { duration }) => {
                info!("Playing ({})", format_hms(duration));
                let envelope = transport.waveform();
                if !envelope.is_empty() {
                    info!("Waveform: {} peaks", envelope.len());
                }
            }
            Ok(TransportEvent::PlaybackFinished) => {
                transport.finish_playback();
                println!();
                println!("Done.");
                break;
            }
            Ok(TransportEvent::PlaybackStopped) => break,
            Ok(TransportEvent::DownloadFinished { file_name, result }) => match result {
                Ok(downloaded) => {
                    info!("Downloaded {}", file_name);
                    transport.update_selected_path(&downloaded);
                    transport.play().map_err(|e| anyhow!(e))?;
                }
                Err(e) => return Err(anyhow!("Download failed: {}", e)),
            },
            Ok(TransportEvent::Status(status)) => info!("{}", status),
            Ok(_) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(anyhow!("Playback produced no updates, giving up"));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

fn run_transcribe(settings: &Settings, file: &Path) -> Result<()> {
    let store = recording_store(settings);
    let stored = store.import(file).map_err(|e| anyhow!(e))?;

    // Probe the real duration instead of guessing; non-WAV uploads decode
    // server-side only, so their duration stays unknown here
    let duration = match RecordingStore::probe_duration(&stored) {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not probe duration of {}: {}", stored.display(), e);
            0.0
        }
    };

    let stem = stored
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut record = ConferenceRecord::new(stored.to_string_lossy().into_owned(), duration);
    record.title = format!("Upload: {}", stem);

    let database = RecordsDatabase::new();
    let mut records = database.load().map_err(|e| anyhow!(e))?;
    database
        .add_record(record.clone(), &mut records)
        .map_err(|e| anyhow!(e))?;

    let client = make_client(settings)?;
    transcribe_record(&client, &database, &mut records, record)
}

/// Upload a record's audio, store the results, and push the metadata back
fn transcribe_record(
    client: &TranscriptionClient,
    database: &RecordsDatabase,
    records: &mut Vec<ConferenceRecord>,
    mut record: ConferenceRecord,
) -> Result<()> {
    println!("Transcribing {} ...", record.file_name());

    let response = tokio_runtime::block_on(client.transcribe(Path::new(&record.file_path)))
        .context("Transcription failed")?;

    record.summary = response.summary.clone();
    record.summary_url = non_empty(response.paths.summary_url);
    record.transcript_url = non_empty(response.paths.transcript_url);
    record.transcript_segments = vec![TranscriptSegment {
        timestamp: 0,
        speaker: "AI".to_string(),
        text: response.transcript.clone(),
    }];
    record.is_transcribed = true;

    if let Err(e) = tokio_runtime::block_on(client.upload_record(&record)) {
        warn!("Failed to push record metadata: {:#}", e);
    }

    database
        .upsert_record(record, records)
        .map_err(|e| anyhow!(e))?;

    println!();
    println!("Transcript:");
    println!("{}", response.transcript);
    if !response.summary.is_empty() {
        println!();
        println!("Summary:");
        println!("{}", response.summary);
    }

    Ok(())
}

fn run_records(settings: &Settings, sync: bool) -> Result<()> {
    let database = RecordsDatabase::new();
    let mut records = database.load().map_err(|e| anyhow!(e))?;

    if sync {
        let client = make_client(settings)?;
        let remote = tokio_runtime::block_on(client.fetch_records())
            .context("Failed to fetch records from backend")?;
        let remote: Vec<ConferenceRecord> = remote.into_iter().map(|d| d.into_record()).collect();
        database
            .merge_remote(remote, &mut records)
            .map_err(|e| anyhow!(e))?;
    }

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {}  {}  {}",
            record.display_date(),
            record.display_duration(),
            if record.is_transcribed { "txt" } else { "---" },
            record.title
        );
    }

    Ok(())
}

fn run_show(settings: &Settings, index: usize, fetch: bool) -> Result<()> {
    let database = RecordsDatabase::new();
    let records = database.load().map_err(|e| anyhow!(e))?;

    let record = index
        .checked_sub(1)
        .and_then(|i| records.get(i))
        .ok_or_else(|| anyhow!("No record #{}", index))?;

    println!("{}", record.title);
    println!(
        "{}  {}  {}",
        record.display_date(),
        record.display_duration(),
        record.file_path
    );

    if fetch {
        let client = make_client(settings)?;
        if let Some(url) = &record.transcript_url {
            match tokio_runtime::block_on(client.fetch_text(url)) {
                Ok(transcript) => {
                    println!();
                    println!("Transcript:");
                    println!("{}", transcript);
                }
                Err(e) => warn!("Failed to fetch transcript: {:#}", e),
            }
        }
        if let Some(url) = &record.summary_url {
            match tokio_runtime::block_on(client.fetch_text(url)) {
                Ok(summary) => {
                    println!();
                    println!("Summary:");
                    println!("{}", summary);
                }
                Err(e) => warn!("Failed to fetch summary: {:#}", e),
            }
        }
        return Ok(());
    }

    if !record.transcript_segments.is_empty() {
        println!();
        println!("Transcript:");
        for segment in &record.transcript_segments {
            println!(
                "[{}] {}: {}",
                segment.display_timestamp(),
                segment.speaker,
                segment.text
            );
        }
    }
    if !record.summary.is_empty() {
        println!();
        println!("Summary:");
        println!("{}", record.summary);
    }

    Ok(())
}

fn run_waveform(file: &Path) -> Result<()> {
    let envelope = waveform::scan_file(file).map_err(|e| anyhow!(e))?;
    println!("{} peaks", envelope.len());

    for sample in &envelope {
        let bar = "#".repeat((sample.value * 60.0).round() as usize);
        println!("{:>6}  {:.3}  {}", sample.index, sample.value, bar);
    }

    Ok(())
}

fn run_devices() -> Result<()> {
    let devices = audio::list_devices().map_err(|e| anyhow!(e))?;

    println!("Inputs:");
    for device in devices.iter().filter(|d| d.kind == DeviceKind::Input) {
        println!("  {:>4}  {}", device.id, device.description);
    }
    println!("Outputs:");
    for device in devices.iter().filter(|d| d.kind == DeviceKind::Output) {
        println!("  {:>4}  {}", device.id, device.description);
    }

    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
