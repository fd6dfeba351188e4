//! YOLO label files: one `class x_center y_center width height` line per object.

use log::warn;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::error::RecordError;
use crate::types::BoundingBox;

const YOLO_FIELDS: usize = 5;

/// Parse one label line. Blank lines yield `Ok(None)`.
pub fn parse_label_line(line: &str) -> Result<Option<BoundingBox>, RecordError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(None);
    }
    if parts.len() != YOLO_FIELDS {
        return Err(RecordError::FieldCount {
            expected: YOLO_FIELDS,
            found: parts.len(),
        });
    }

    let class_id = parts[0]
        .parse::<u32>()
        .map_err(|_| RecordError::InvalidField {
            field: "class_id",
            value: parts[0].to_string(),
        })?;
    let coord = |idx: usize, field: &'static str| -> Result<f64, RecordError> {
        parts[idx]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RecordError::InvalidField {
                field,
                value: parts[idx].to_string(),
            })
    };

    Ok(Some(BoundingBox {
        class_id,
        x_center: coord(1, "x_center")?,
        y_center: coord(2, "y_center")?,
        width: coord(3, "width")?,
        height: coord(4, "height")?,
    }))
}

/// One raw line of an annotation file, decoded on demand.
#[derive(Debug, Clone, Copy)]
pub struct RawLine<'a> {
    pub number: usize,
    pub bytes: &'a [u8],
}

impl<'a> RawLine<'a> {
    pub fn text(&self) -> Result<&'a str, RecordError> {
        std::str::from_utf8(self.bytes).map_err(|_| RecordError::InvalidEncoding)
    }
}

/// Split file content on `\n`. Each line is decoded on its own, so a bad
/// byte only invalidates the line that holds it.
pub fn raw_lines(content: &[u8]) -> impl Iterator<Item = RawLine<'_>> {
    content
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(idx, bytes)| RawLine {
            number: idx + 1,
            bytes,
        })
}

pub fn warn_malformed(source: &str, line: &RawLine<'_>, err: &RecordError) {
    warn!(
        "Malformed line {} in {}: '{}' ({}). Line skipped.",
        line.number,
        source,
        String::from_utf8_lossy(line.bytes).trim(),
        err
    );
}

/// Boxes read from one label file, plus how many lines had to be skipped.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LabelFile {
    pub boxes: Vec<BoundingBox>,
    pub malformed: usize,
}

/// Parse label file content, logging and skipping malformed lines.
pub fn parse_label_content(content: &[u8], source: &str) -> LabelFile {
    let mut parsed = LabelFile::default();
    for line in raw_lines(content) {
        match line.text().and_then(parse_label_line) {
            Ok(Some(bbox)) => parsed.boxes.push(bbox),
            Ok(None) => {}
            Err(e) => {
                warn_malformed(source, &line, &e);
                parsed.malformed += 1;
            }
        }
    }
    parsed
}

/// Read a label file. A missing file means the image has no objects.
pub fn read_label_file(path: &Path) -> io::Result<LabelFile> {
    match fs::read(path) {
        Ok(content) => Ok(parse_label_content(&content, &path.display().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LabelFile::default()),
        Err(e) => Err(e),
    }
}

pub fn format_label_lines(boxes: &[BoundingBox]) -> String {
    let mut out = String::with_capacity(boxes.len() * 48);
    for bbox in boxes {
        out.push_str(&bbox.to_label_line());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let bbox = parse_label_line("2 0.5 0.25 0.1 0.2").unwrap().unwrap();
        assert_eq!(bbox, BoundingBox::new(2, 0.5, 0.25, 0.1, 0.2));
    }

    #[test]
    fn blank_line_is_not_an_error() {
        assert_eq!(parse_label_line("   "), Ok(None));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            parse_label_line("0 0.5 0.5 0.1"),
            Err(RecordError::FieldCount {
                expected: 5,
                found: 4
            })
        );
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert!(matches!(
            parse_label_line("car 0.5 0.5 0.1 0.1"),
            Err(RecordError::InvalidField { field: "class_id", .. })
        ));
        assert!(matches!(
            parse_label_line("0 0.5 nan 0.1 0.1"),
            Err(RecordError::InvalidField { field: "y_center", .. })
        ));
    }

    #[test]
    fn malformed_lines_do_not_stop_the_file() {
        let text = "0 0.5 0.5 0.1 0.1\nbroken\n\n1 0.2 0.2 0.05 0.05\n";
        let parsed = parse_label_content(text.as_bytes(), "test.txt");
        assert_eq!(parsed.boxes.len(), 2);
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.boxes[1].class_id, 1);
    }

    #[test]
    fn invalid_utf8_costs_only_its_line() {
        let content = b"0 0.5 0.5 0.2 0.2\n0 0.1 0.1 0.05 \xff\r\n1 0.3 0.3 0.1 0.1";
        let parsed = parse_label_content(content, "bytes.txt");
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.boxes.len(), 2);
        assert_eq!(parsed.boxes[1], BoundingBox::new(1, 0.3, 0.3, 0.1, 0.1));
    }

    #[test]
    fn missing_label_file_means_no_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = read_label_file(&dir.path().join("absent.txt")).unwrap();
        assert_eq!(parsed, LabelFile::default());
    }

    #[test]
    fn formats_six_decimals() {
        let text = format_label_lines(&[BoundingBox::new(0, 1.0 / 6.0, 0.5, 1.0 / 3.0, 0.25)]);
        assert_eq!(text, "0 0.166667 0.500000 0.333333 0.250000\n");
    }
}
