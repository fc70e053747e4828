//! Local Persistence Module
//!
//! Convenience-only state kept between runs: the chart interval preference,
//! an obfuscated copy of the signing key, and an optional CSV log of
//! aggregation cycles for later analysis.
//!
//! The key obfuscation only keeps the key from showing up as plain text in
//! the settings file. It is not encryption.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::overlay::AggregatedIntervalResult;
use crate::types::Interval;

const SETTINGS_FILE: &str = "settings.json";
const CYCLES_FILE: &str = "overlay_cycles.csv";
const KEY_SALT: &[u8] = b"polyoverlay-local-key-salt";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(default)]
    interval: Option<Interval>,
    #[serde(default)]
    signing_key: Option<String>,
}

/// XOR with the salt, then base64
fn obfuscate(key: &str) -> String {
    let bytes: Vec<u8> = key
        .bytes()
        .zip(KEY_SALT.iter().cycle())
        .map(|(b, s)| b ^ s)
        .collect();
    BASE64.encode(bytes)
}

fn deobfuscate(stored: &str) -> Option<String> {
    let bytes = BASE64.decode(stored.trim()).ok()?;
    let plain: Vec<u8> = bytes
        .iter()
        .zip(KEY_SALT.iter().cycle())
        .map(|(b, s)| b ^ s)
        .collect();
    String::from_utf8(plain).ok()
}

/// JSON settings file in the data directory
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: StoredSettings,
}

impl SettingsStore {
    /// Open (or start) the settings file; an unreadable file starts empty
    pub fn open(data_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(data_dir);
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        let path = dir.join(SETTINGS_FILE);

        let settings = if path.exists() {
            let raw = fs::read_to_string(&path).context("Failed to read settings file")?;
            match serde_json::from_str(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Settings file unreadable, starting fresh");
                    StoredSettings::default()
                }
            }
        } else {
            StoredSettings::default()
        };

        Ok(Self { path, settings })
    }

    pub fn interval(&self) -> Option<Interval> {
        self.settings.interval
    }

    pub fn set_interval(&mut self, interval: Interval) -> Result<()> {
        if self.settings.interval == Some(interval) {
            return Ok(());
        }
        self.settings.interval = Some(interval);
        self.persist()
    }

    pub fn save_key(&mut self, key: &str) -> Result<()> {
        self.settings.signing_key = Some(obfuscate(key.trim()));
        self.persist()
    }

    /// Stored key; `None` when absent or no longer decodable
    pub fn load_key(&self) -> Option<String> {
        let stored = self.settings.signing_key.as_deref()?;
        let key = deobfuscate(stored);
        if key.is_none() {
            warn!("Stored signing key is corrupt, ignoring it");
        }
        key.filter(|k| !k.is_empty())
    }

    pub fn clear_key(&mut self) -> Result<()> {
        if self.settings.signing_key.take().is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)
            .context("Failed to serialize settings")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write settings file")?;
        fs::rename(&tmp, &self.path).context("Failed to replace settings file")?;
        Ok(())
    }
}

/// One aggregated interval as written to the cycle log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub interval: String,
    pub open_price: Decimal,
    pub close_price: Option<Decimal>,
    pub probability: Decimal,
    pub window_end: i64,
}

/// Append-only CSV log of aggregation cycles
#[derive(Debug)]
pub struct CycleRecorder {
    writer: Mutex<csv::Writer<fs::File>>,
}

impl CycleRecorder {
    pub fn new(data_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(data_dir);
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        let writer = Self::create_writer(&dir, CYCLES_FILE)?;
        info!(path = %dir.join(CYCLES_FILE).display(), "📝 Recording aggregation cycles");
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    /// Write one row per result; returns the number of rows written
    pub fn record(
        &self,
        symbol: &str,
        results: &[AggregatedIntervalResult],
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("Cycle writer lock poisoned"))?;
        for result in results {
            writer
                .serialize(CycleRecord {
                    timestamp: at.timestamp(),
                    symbol: symbol.to_string(),
                    interval: result.interval.to_string(),
                    open_price: result.open_price,
                    close_price: result.close_price,
                    probability: result.traded_probability,
                    window_end: result.window_end.timestamp(),
                })
                .context("Failed to write cycle record")?;
        }
        writer.flush().context("Failed to flush cycle writer")?;
        Ok(results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use csv::ReaderBuilder;
    use rust_decimal_macros::dec;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "polyoverlay_persistence_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    #[test]
    fn interval_preference_survives_reopen() {
        let dir = temp_data_dir("interval");
        let dir_str = dir.to_str().unwrap();

        let mut store = SettingsStore::open(dir_str).unwrap();
        assert_eq!(store.interval(), None);
        store.set_interval(Interval::Min15).unwrap();

        let reopened = SettingsStore::open(dir_str).unwrap();
        assert_eq!(reopened.interval(), Some(Interval::Min15));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn key_is_not_stored_in_plain_text() {
        let dir = temp_data_dir("key");
        let dir_str = dir.to_str().unwrap();
        let key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

        let mut store = SettingsStore::open(dir_str).unwrap();
        store.save_key(key).unwrap();

        let raw = fs::read_to_string(dir.join(SETTINGS_FILE)).unwrap();
        assert!(!raw.contains("4c0883a6"));
        assert_eq!(SettingsStore::open(dir_str).unwrap().load_key().as_deref(), Some(key));

        store.clear_key().unwrap();
        assert_eq!(SettingsStore::open(dir_str).unwrap().load_key(), None);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_key_loads_as_none() {
        let dir = temp_data_dir("corrupt_key");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(SETTINGS_FILE),
            r#"{"interval":"1h","signing_key":"%%% not base64 %%%"}"#,
        )
        .unwrap();

        let store = SettingsStore::open(dir.to_str().unwrap()).unwrap();
        assert_eq!(store.load_key(), None);
        assert_eq!(store.interval(), Some(Interval::Hour1));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_settings_file_starts_fresh() {
        let dir = temp_data_dir("corrupt_file");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SETTINGS_FILE), "{ not json").unwrap();

        let store = SettingsStore::open(dir.to_str().unwrap()).unwrap();
        assert_eq!(store.interval(), None);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn cycle_recorder_writes_header_once() {
        let dir = temp_data_dir("cycles");
        let dir_str = dir.to_str().unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 12, 13, 5, 0).unwrap();
        let result = AggregatedIntervalResult {
            interval: Interval::Min5,
            label: "5m",
            color: "#52c41a",
            open_price: dec!(71000.5),
            close_price: None,
            traded_probability: dec!(62.5),
            primary_token_id: None,
            window_start: end - chrono::Duration::minutes(5),
            window_end: end,
        };

        CycleRecorder::new(dir_str)
            .unwrap()
            .record("BTCUSDT", &[result.clone()], end)
            .unwrap();
        CycleRecorder::new(dir_str)
            .unwrap()
            .record("BTCUSDT", &[result], end)
            .unwrap();

        let mut reader = ReaderBuilder::new()
            .from_path(dir.join(CYCLES_FILE))
            .unwrap();
        let rows: Vec<CycleRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].interval, "5m");
        assert_eq!(rows[0].probability, dec!(62.5));
        assert_eq!(rows[1].close_price, None);

        let _ = fs::remove_dir_all(&dir);
    }
}
