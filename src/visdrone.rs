//! VisDrone detection annotations:
//! `bbox_left,bbox_top,bbox_width,bbox_height,score,object_category,truncation,occlusion`.

use crate::error::RecordError;

const VISDRONE_FIELDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisDroneRecord {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
    /// 0 marks boxes the benchmark ignores.
    pub score: i64,
    pub category: u32,
    pub truncation: i64,
    pub occlusion: i64,
}

/// Parse one record. A trailing comma is tolerated; blank lines yield `Ok(None)`.
pub fn parse_visdrone_line(line: &str) -> Result<Option<VisDroneRecord>, RecordError> {
    let cleaned = line.trim().trim_end_matches(',');
    if cleaned.is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = cleaned.split(',').map(str::trim).collect();
    if parts.len() != VISDRONE_FIELDS {
        return Err(RecordError::FieldCount {
            expected: VISDRONE_FIELDS,
            found: parts.len(),
        });
    }

    let int = |idx: usize, field: &'static str| -> Result<i64, RecordError> {
        parts[idx].parse::<i64>().map_err(|_| RecordError::InvalidField {
            field,
            value: parts[idx].to_string(),
        })
    };
    let category = parts[5]
        .parse::<u32>()
        .map_err(|_| RecordError::InvalidField {
            field: "object_category",
            value: parts[5].to_string(),
        })?;

    Ok(Some(VisDroneRecord {
        left: int(0, "bbox_left")?,
        top: int(1, "bbox_top")?,
        width: int(2, "bbox_width")?,
        height: int(3, "bbox_height")?,
        score: int(4, "score")?,
        category,
        truncation: int(6, "truncation")?,
        occlusion: int(7, "occlusion")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_with_trailing_comma() {
        let rec = parse_visdrone_line("684,8,273,116,1,4,0,0,\n").unwrap().unwrap();
        assert_eq!(rec.left, 684);
        assert_eq!(rec.height, 116);
        assert_eq!(rec.category, 4);
        assert_eq!(rec.score, 1);
    }

    #[test]
    fn rejects_short_and_non_integer_records() {
        assert_eq!(
            parse_visdrone_line("1,2,3,4,1,4"),
            Err(RecordError::FieldCount {
                expected: 8,
                found: 6
            })
        );
        assert!(matches!(
            parse_visdrone_line("1,2,3.5,4,1,4,0,0"),
            Err(RecordError::InvalidField { field: "bbox_width", .. })
        ));
    }
}
