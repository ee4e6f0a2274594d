use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A segment of transcribed conference audio
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptSegment {
    /// Offset into the recording, in whole seconds
    pub timestamp: i64,
    pub speaker: String,
    pub text: String,
}

impl TranscriptSegment {
    pub fn display_timestamp(&self) -> String {
        format_hms(self.timestamp as f64)
    }
}

/// A conference recording with its transcription state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceRecord {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub file_path: String,
    pub summary: String,
    pub is_transcribed: bool,
    pub summary_url: Option<String>,
    pub transcript_url: Option<String>,
    pub transcript_segments: Vec<TranscriptSegment>,
}

impl ConferenceRecord {
    /// Create a record for a freshly finished recording
    pub fn new(file_path: String, duration_seconds: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: format!("Meeting {}", Local::now().format("%m/%d %H:%M")),
            date: Utc::now(),
            duration_seconds,
            file_path,
            summary: String::new(),
            is_transcribed: false,
            summary_url: None,
            transcript_url: None,
            transcript_segments: Vec::new(),
        }
    }

    /// File name component of the backing audio file
    pub fn file_name(&self) -> String {
        std::path::Path::new(&self.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.clone())
    }

    pub fn display_date(&self) -> String {
        self.date
            .with_timezone(&Local)
            .format("%Y/%m/%d %H:%M")
            .to_string()
    }

    pub fn display_duration(&self) -> String {
        let total = self.duration_seconds.max(0.0) as u64;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
}

/// Response body of `POST /transcribe`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub paths: RecordPaths,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub summary: String,
}

/// Artifact locations returned by the transcription service
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecordPaths {
    #[serde(default)]
    pub audio_url: String,
    #[serde(default)]
    pub transcript_url: String,
    #[serde(default)]
    pub summary_url: String,
}

/// Wire shape for `POST /record` and `GET /records`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceRecordDto {
    pub id: String,
    pub title: String,
    /// ISO-8601 timestamp
    pub date: String,
    /// Duration in seconds
    pub duration: f64,
    pub file_path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub is_transcribed: bool,
    #[serde(default)]
    pub transcript_segments: Vec<TranscriptSegment>,
}

impl From<&ConferenceRecord> for ConferenceRecordDto {
    fn from(record: &ConferenceRecord) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
            date: record.date.to_rfc3339(),
            duration: record.duration_seconds,
            file_path: record.file_path.clone(),
            summary: record.summary.clone(),
            is_transcribed: record.is_transcribed,
            transcript_segments: record.transcript_segments.clone(),
        }
    }
}

impl ConferenceRecordDto {
    /// Convert a wire record into the domain model, tolerating malformed
    /// ids and dates from older backend versions
    pub fn into_record(self) -> ConferenceRecord {
        let id = Uuid::parse_str(&self.id).unwrap_or_else(|_| Uuid::new_v4());
        let date = DateTime::parse_from_rfc3339(&self.date)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        ConferenceRecord {
            id,
            title: self.title,
            date,
            duration_seconds: self.duration,
            file_path: self.file_path,
            summary: self.summary,
            is_transcribed: self.is_transcribed,
            summary_url: None,
            transcript_url: None,
            transcript_segments: self.transcript_segments,
        }
    }
}

/// Format seconds as hh:mm:ss for status displays
pub fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(61.4), "00:01:01");
        assert_eq!(format_hms(3723.0), "01:02:03");
        assert_eq!(format_hms(-5.0), "00:00:00");
    }

    #[test]
    fn test_dto_roundtrip() {
        let record = ConferenceRecord::new("/tmp/recording_20250101_120000.wav".into(), 12.5);
        let dto = ConferenceRecordDto::from(&record);
        let back = dto.into_record();

        assert_eq!(back.id, record.id);
        assert_eq!(back.duration_seconds, 12.5);
        assert_eq!(back.file_path, record.file_path);
        assert!(!back.is_transcribed);
    }

    #[test]
    fn test_dto_tolerates_bad_id_and_date() {
        let dto = ConferenceRecordDto {
            id: "not-a-uuid".into(),
            title: "Imported".into(),
            date: "yesterday".into(),
            duration: 3.0,
            file_path: "meeting.wav".into(),
            summary: String::new(),
            is_transcribed: false,
            transcript_segments: Vec::new(),
        };

        let record = dto.into_record();
        assert_eq!(record.title, "Imported");
        assert_eq!(record.duration_seconds, 3.0);
    }

    #[test]
    fn test_record_file_name() {
        let record = ConferenceRecord::new("/home/user/recordings/meeting.wav".into(), 1.0);
        assert_eq!(record.file_name(), "meeting.wav");
    }
}
