//! Per-batch capture metadata (`metadata.txt`) and the per-tile CSV built from it.

use anyhow::Context;
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::tiling::TilingConfig;
use crate::types::TileSpec;

pub const METADATA_FILE: &str = "metadata.txt";

/// `key: value` pairs describing how a batch of images was captured.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchMetadata {
    fields: BTreeMap<String, String>,
}

impl BatchMetadata {
    /// Lines without a `:` are ignored. Keys are matched case-insensitively.
    pub fn parse(text: &str) -> Self {
        let fields = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
            .collect();
        Self { fields }
    }

    /// `Ok(None)` when the batch has no metadata file.
    pub fn read(path: &Path) -> io::Result<Option<Self>> {
        match fs::read(path) {
            Ok(content) => Ok(Some(Self::parse(&String::from_utf8_lossy(&content)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn text(&self, key: &str) -> String {
        self.fields
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Integer field, or -1 when it is absent or not a number.
    pub fn number(&self, key: &str) -> i64 {
        match self.fields.get(&key.to_lowercase()) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("Metadata field {} has non-numeric value '{}'.", key, value);
                -1
            }),
            None => -1,
        }
    }
}

/// One CSV row per written tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRow {
    pub id: String,
    pub angle: i64,
    pub altitude: i64,
    pub meteo: String,
    pub region: String,
    pub mode: String,
    pub y_start: u32,
    pub y_end: u32,
}

impl MetadataRow {
    pub fn new(id: String, metadata: &BatchMetadata, region: &str, tile: &TileSpec) -> Self {
        Self {
            id,
            angle: metadata.number("Angle"),
            altitude: metadata.number("Altitude"),
            meteo: metadata.text("Meteo"),
            region: region.to_string(),
            mode: metadata.text("Mode"),
            y_start: tile.y_min,
            y_end: tile.y_max,
        }
    }
}

/// `<output_root>/<source name, lowercase>_metadata_<W>x<H>.csv`
pub fn metadata_csv_path(output_root: &Path, source_dir: &Path, config: &TilingConfig) -> PathBuf {
    let name = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "dataset".to_string());
    output_root.join(format!(
        "{}_metadata_{}x{}.csv",
        name, config.tile_width, config.tile_height
    ))
}

pub fn write_metadata_csv(path: &Path, rows: &[MetadataRow]) -> anyhow::Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let meta = BatchMetadata::parse("Angle: 45\nAltitude : 60\nMeteo: cloudy\nnotes without colon\nMode: video\n");
        assert_eq!(meta.number("Angle"), 45);
        assert_eq!(meta.number("altitude"), 60);
        assert_eq!(meta.text("Meteo"), "cloudy");
        assert_eq!(meta.text("Mode"), "video");
    }

    #[test]
    fn missing_or_invalid_fields_fall_back() {
        let meta = BatchMetadata::parse("Angle: steep\n");
        assert_eq!(meta.number("Angle"), -1);
        assert_eq!(meta.number("Altitude"), -1);
        assert_eq!(meta.text("Meteo"), "unknown");
        assert!(BatchMetadata::parse("no pairs here").is_empty());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(BatchMetadata::read(&dir.path().join(METADATA_FILE)).unwrap(), None);
    }

    #[test]
    fn writes_rows_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let meta = BatchMetadata::parse("Angle: 90\nAltitude: 30\nMeteo: sunny\nMode: photo\n");
        let tile = TileSpec {
            x_min: 0,
            y_min: 480,
            x_max: 640,
            y_max: 1000,
        };
        let row = MetadataRow::new("SAVI_b1_7_480_1000".to_string(), &meta, "rural", &tile);
        write_metadata_csv(&path, &[row]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "id,angle,altitude,meteo,region,mode,y_start,y_end\nSAVI_b1_7_480_1000,90,30,sunny,rural,photo,480,1000\n"
        );
    }
}
