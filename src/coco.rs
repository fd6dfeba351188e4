//! COCO format data structures and utilities
//!
//! Only the parts of a COCO instances file needed to derive YOLO boxes are
//! modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u32,
    pub bbox: [f64; 4], // [x, y, width, height]
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoFile {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl CocoFile {
    /// Parse a COCO JSON file directly from a buffered file stream.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse COCO JSON {}", path.display()))
    }

    /// Annotations grouped by image id, in file order within each image.
    pub fn annotations_by_image(&self) -> BTreeMap<u64, Vec<&Annotation>> {
        let mut grouped: BTreeMap<u64, Vec<&Annotation>> = BTreeMap::new();
        for ann in &self.annotations {
            grouped.entry(ann.image_id).or_default().push(ann);
        }
        grouped
    }

    pub fn image_index(&self) -> BTreeMap<u64, &Image> {
        self.images.iter().map(|img| (img.id, img)).collect()
    }
}

/// Convert a COCO `[x_min, y_min, width, height]` box to normalized YOLO
/// `(x_center, y_center, width, height)`.
pub fn coco_to_yolo(
    x_min: f64,
    y_min: f64,
    width: f64,
    height: f64,
    img_width: u32,
    img_height: u32,
) -> (f64, f64, f64, f64) {
    let img_w = img_width as f64;
    let img_h = img_height as f64;
    (
        (x_min + width / 2.0) / img_w,
        (y_min + height / 2.0) / img_h,
        width / img_w,
        height / img_h,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_corner_box_to_center_form() {
        let (xc, yc, w, h) = coco_to_yolo(10.0, 20.0, 30.0, 40.0, 100, 200);
        assert_eq!(xc, 0.25);
        assert_eq!(yc, 0.2);
        assert_eq!(w, 0.3);
        assert_eq!(h, 0.2);
    }

    #[test]
    fn groups_annotations_per_image() {
        let coco: CocoFile = serde_json::from_str(
            r#"{
                "categories": [{"id": 1, "name": "person", "supercategory": "person"}],
                "images": [{"id": 1, "file_name": "a.JPG", "width": 100, "height": 100}],
                "annotations": [
                    {"id": 1, "image_id": 1, "category_id": 1, "bbox": [0, 0, 10, 10], "area": 100},
                    {"id": 2, "image_id": 2, "category_id": 1, "bbox": [0, 0, 10, 10]},
                    {"id": 3, "image_id": 1, "category_id": 1, "bbox": [5, 5, 10, 10]}
                ]
            }"#,
        )
        .unwrap();
        let grouped = coco.annotations_by_image();
        assert_eq!(grouped[&1].len(), 2);
        assert_eq!(grouped[&1][1].id, 3);
        assert_eq!(grouped[&2].len(), 1);
    }
}
