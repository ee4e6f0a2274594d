//! JSON-based database for persisting conference records
//!
//! Stores record metadata in a JSON file at ~/.local/share/confab/records.json
//! so the records list works without the backend.

use crate::models::ConferenceRecord;
use std::fs;
use std::path::PathBuf;

/// Local cache of conference records
pub struct RecordsDatabase {
    path: PathBuf,
}

impl RecordsDatabase {
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("confab")
            .join("records.json")
    }

    fn ensure_dir(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create database directory: {}", e))?;
        }
        Ok(())
    }

    /// Load records from the database; an absent file is an empty list
    pub fn load(&self) -> Result<Vec<ConferenceRecord>, String> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read database: {}", e))?;

        let records: Vec<ConferenceRecord> = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse database: {}", e))?;

        Ok(records)
    }

    /// Save records to the database
    pub fn save(&self, records: &[ConferenceRecord]) -> Result<(), String> {
        self.ensure_dir()?;

        let contents = serde_json::to_string_pretty(records)
            .map_err(|e| format!("Failed to serialize records: {}", e))?;

        fs::write(&self.path, contents).map_err(|e| format!("Failed to write database: {}", e))?;

        Ok(())
    }

    /// Add a new record at the head of the list and persist
    pub fn add_record(
        &self,
        record: ConferenceRecord,
        existing: &mut Vec<ConferenceRecord>,
    ) -> Result<(), String> {
        existing.insert(0, record);
        self.save(existing)
    }

    /// Replace or insert a record by id and persist
    pub fn upsert_record(
        &self,
        record: ConferenceRecord,
        existing: &mut Vec<ConferenceRecord>,
    ) -> Result<(), String> {
        match existing.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => existing.insert(0, record),
        }
        self.save(existing)
    }

    /// Merge records fetched from the backend into the local list
    ///
    /// Remote entries win on id collision; local-only entries are kept.
    pub fn merge_remote(
        &self,
        remote: Vec<ConferenceRecord>,
        existing: &mut Vec<ConferenceRecord>,
    ) -> Result<(), String> {
        for record in remote {
            match existing.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record,
                None => existing.push(record),
            }
        }
        existing.sort_by(|a, b| b.date.cmp(&a.date));
        self.save(existing)
    }
}

impl Default for RecordsDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(tag: &str) -> RecordsDatabase {
        let dir = std::env::temp_dir().join("confab-database");
        std::fs::create_dir_all(&dir).unwrap();
        RecordsDatabase::with_path(dir.join(format!("{}.json", tag)))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let db = temp_db("missing");
        let _ = std::fs::remove_file(&db.path);
        assert!(db.load().unwrap().is_empty());
    }

    #[test]
    fn test_add_and_reload() {
        let db = temp_db("add");
        let _ = std::fs::remove_file(&db.path);

        let mut records = Vec::new();
        db.add_record(ConferenceRecord::new("a.wav".into(), 1.0), &mut records)
            .unwrap();
        db.add_record(ConferenceRecord::new("b.wav".into(), 2.0), &mut records)
            .unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(loaded.len(), 2);
        // Newest first
        assert_eq!(loaded[0].file_path, "b.wav");
    }

    #[test]
    fn test_merge_remote_wins_on_collision() {
        let db = temp_db("merge");
        let _ = std::fs::remove_file(&db.path);

        let mut local = ConferenceRecord::new("local.wav".into(), 1.0);
        local.summary = "old".into();
        let mut records = vec![local.clone()];

        let mut remote = local.clone();
        remote.summary = "new".into();
        db.merge_remote(vec![remote], &mut records).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].summary, "new");
    }
}
