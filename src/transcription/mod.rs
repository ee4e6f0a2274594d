//! Client for the remote transcription service
//!
//! Uploads recordings for transcription and summarization, syncs record
//! metadata, and re-downloads audio the server still has when the local
//! copy is gone.

use crate::models::{ConferenceRecord, ConferenceRecordDto, TranscriptionResponse};
use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP client for the transcription backend
///
/// Carries its own timeout so callers configure it instead of relying on
/// process-wide state.
#[derive(Clone)]
pub struct TranscriptionClient {
    client: reqwest::Client,
    base_url: String,
}

impl TranscriptionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload an audio file to `POST /transcribe` and parse the result
    pub async fn transcribe(&self, path: &Path) -> Result<TranscriptionResponse> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file: {}", path.display()))?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(content_type_for(path))
            .context("Invalid content type")?;
        let form = Form::new().part("file", part);

        info!("Uploading {} for transcription", file_name);
        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Transcription failed: {} - {}", status, body);
        }

        response
            .json::<TranscriptionResponse>()
            .await
            .context("Failed to parse transcription response")
    }

    /// Push a finished record's metadata to `POST /record`
    pub async fn upload_record(&self, record: &ConferenceRecord) -> Result<()> {
        let dto = ConferenceRecordDto::from(record);
        let response = self
            .client
            .post(format!("{}/record", self.base_url))
            .json(&dto)
            .send()
            .await
            .context("Record upload failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Record upload failed: {} - {}", status, body);
        }

        debug!("Uploaded record {}", record.id);
        Ok(())
    }

    /// Fetch all records from `GET /records`
    pub async fn fetch_records(&self) -> Result<Vec<ConferenceRecordDto>> {
        let response = self
            .client
            .get(format!("{}/records", self.base_url))
            .send()
            .await
            .context("Failed to fetch records")?;

        if !response.status().is_success() {
            bail!("Failed to fetch records: {}", response.status());
        }

        response
            .json::<Vec<ConferenceRecordDto>>()
            .await
            .context("Failed to parse records")
    }

    /// Re-download a recording the server keeps under `/uploads/{stem}/{file}`
    ///
    /// Streams into a `.downloading` temp file, then renames into place.
    pub async fn download_audio(&self, file_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let folder = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("Invalid file name: {}", file_name))?;
        let url = format!("{}/uploads/{}/{}", self.base_url, folder, file_name);

        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let temp_path = dest_dir.join(format!("{}.downloading", file_name));
        let final_path = dest_dir.join(file_name);

        debug!("Downloading {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;

        if !response.status().is_success() {
            bail!("Download failed: {} for {}", response.status(), url);
        }

        let mut file = std::fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Download interrupted")?;
            file.write_all(&chunk).context("Failed to write download")?;
        }

        std::fs::rename(&temp_path, &final_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                temp_path.display(),
                final_path.display()
            )
        })?;

        Ok(final_path)
    }

    /// Fetch a plain-text artifact (transcript or summary) by its URL path
    pub async fn fetch_text(&self, url_path: &str) -> Result<String> {
        let url = if url_path.starts_with("http") {
            url_path.to_string()
        } else {
            format!("{}{}", self.base_url, url_path)
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !response.status().is_success() {
            bail!("Failed to fetch {}: {}", url, response.status());
        }

        response.text().await.context("Failed to read response body")
    }
}

/// Multipart content type for an audio file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("a.wav")), "audio/wav");
        assert_eq!(content_type_for(Path::new("a.m4a")), "audio/mp4");
        assert_eq!(content_type_for(Path::new("a.flac")), "audio/flac");
        assert_eq!(content_type_for(Path::new("a.ogg")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("noext")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("UPPER.WAV")), "audio/wav");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            TranscriptionClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_transcription_response_parse() {
        let json = r#"{
            "filename": "recording_20250101_120000.wav",
            "status": "done",
            "paths": {
                "audio_url": "/uploads/recording_20250101_120000/recording_20250101_120000.wav",
                "transcript_url": "/uploads/recording_20250101_120000/transcript.txt",
                "summary_url": "/uploads/recording_20250101_120000/summary.txt"
            },
            "transcript": "hello world",
            "summary": "greeting"
        }"#;

        let response: TranscriptionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, "done");
        assert_eq!(response.transcript, "hello world");
        assert!(response.paths.transcript_url.ends_with("transcript.txt"));
    }

    #[test]
    fn test_transcription_response_tolerates_missing_fields() {
        let response: TranscriptionResponse = serde_json::from_str("{}").unwrap();
        assert!(response.transcript.is_empty());
        assert!(response.paths.summary_url.is_empty());
    }

    #[test]
    fn test_record_dto_wire_shape() {
        let record = crate::models::ConferenceRecord::new("meeting.wav".into(), 42.0);
        let dto = ConferenceRecordDto::from(&record);
        let value = serde_json::to_value(&dto).unwrap();

        assert!(value.get("id").is_some());
        assert_eq!(value.get("duration").unwrap().as_f64().unwrap(), 42.0);
        assert_eq!(
            value.get("file_path").unwrap().as_str().unwrap(),
            "meeting.wav"
        );
        assert!(value.get("transcript_segments").unwrap().is_array());
    }
}
