//! Class identifier remapping between a source dataset and the unified label set.
//!
//! Unified classes: Person (0), Bicycle (1), Car (2).

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::config::ClassPreset;
use crate::error::ConfigError;
use crate::types::BoundingBox;

/// Outcome of looking up one source class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassLookup {
    Mapped(u32),
    Ignored,
    Unexpected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMap {
    #[serde(default)]
    pub mapping: BTreeMap<u32, u32>,
    #[serde(default)]
    pub ignore: BTreeSet<u32>,
    /// Ids absent from `mapping` keep their value instead of being reported.
    #[serde(default)]
    pub passthrough: bool,
}

impl ClassMap {
    pub fn new(mapping: BTreeMap<u32, u32>, ignore: BTreeSet<u32>) -> Self {
        Self {
            mapping,
            ignore,
            passthrough: false,
        }
    }

    pub fn identity() -> Self {
        Self {
            passthrough: true,
            ..Self::default()
        }
    }

    /// HIT-UAV: Person(0), Car(1), Bicycle(2), OtherVehicle(3), DontCare(4).
    pub fn hit_uav() -> Self {
        Self::new(
            BTreeMap::from([(0, 0), (1, 2), (2, 1)]),
            BTreeSet::from([3, 4]),
        )
    }

    /// POP has a single COCO category, Person with id 1.
    pub fn pop() -> Self {
        Self::new(BTreeMap::from([(1, 0)]), BTreeSet::new())
    }

    /// VisDrone: ignored regions(0), pedestrian(1), people(2), bicycle(3), car(4),
    /// van(5), truck(6), tricycle(7), awning-tricycle(8), bus(9), motor(10), others(11).
    pub fn visdrone() -> Self {
        Self::new(
            BTreeMap::from([
                (1, 0),
                (2, 0),
                (3, 1),
                (4, 2),
                (5, 2),
                (6, 2),
                (7, 1),
                (8, 1),
                (9, 2),
                (10, 1),
            ]),
            BTreeSet::from([0, 11]),
        )
    }

    pub fn from_preset(preset: ClassPreset) -> Self {
        match preset {
            ClassPreset::Identity => Self::identity(),
            ClassPreset::HitUav => Self::hit_uav(),
            ClassPreset::Pop => Self::pop(),
            ClassPreset::Visdrone => Self::visdrone(),
        }
    }

    /// Load a class map from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path).map_err(|source| ConfigError::ClassMapRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
            ConfigError::ClassMapParse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// A class map file wins over the preset when both are given.
    pub fn resolve_source(preset: ClassPreset, file: Option<&Path>) -> Result<Self, ConfigError> {
        match file {
            Some(path) => Self::load(path),
            None => Ok(Self::from_preset(preset)),
        }
    }

    pub fn lookup(&self, source_id: u32) -> ClassLookup {
        if self.ignore.contains(&source_id) {
            return ClassLookup::Ignored;
        }
        match self.mapping.get(&source_id) {
            Some(&target) => ClassLookup::Mapped(target),
            None if self.passthrough => ClassLookup::Mapped(source_id),
            None => ClassLookup::Unexpected,
        }
    }

    /// Remap every box. Each box is resolved on its own; an unmapped id is
    /// always dropped and never inherits a neighbour's class.
    /// Returns the surviving boxes and the number of unexpected ids.
    pub fn apply(&self, boxes: &[BoundingBox], source: &str) -> (Vec<BoundingBox>, usize) {
        let mut kept = Vec::with_capacity(boxes.len());
        let mut unexpected = 0;
        for bbox in boxes {
            match self.lookup(bbox.class_id) {
                ClassLookup::Mapped(class_id) => kept.push(BoundingBox { class_id, ..*bbox }),
                ClassLookup::Ignored => {}
                ClassLookup::Unexpected => {
                    warn!(
                        "Unexpected class id {} in {}. Annotation dropped.",
                        bbox.class_id, source
                    );
                    unexpected += 1;
                }
            }
        }
        (kept, unexpected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_uav_swaps_car_and_bicycle() {
        let map = ClassMap::hit_uav();
        assert_eq!(map.lookup(0), ClassLookup::Mapped(0));
        assert_eq!(map.lookup(1), ClassLookup::Mapped(2));
        assert_eq!(map.lookup(2), ClassLookup::Mapped(1));
        assert_eq!(map.lookup(4), ClassLookup::Ignored);
        assert_eq!(map.lookup(7), ClassLookup::Unexpected);
    }

    #[test]
    fn ignore_takes_precedence_over_mapping() {
        let map = ClassMap::new(BTreeMap::from([(3, 1)]), BTreeSet::from([3]));
        assert_eq!(map.lookup(3), ClassLookup::Ignored);
    }

    #[test]
    fn identity_passes_everything_through() {
        assert_eq!(ClassMap::identity().lookup(42), ClassLookup::Mapped(42));
    }

    #[test]
    fn unmapped_box_is_dropped_not_inherited() {
        let boxes = [
            BoundingBox::new(1, 0.5, 0.5, 0.1, 0.1),
            BoundingBox::new(99, 0.5, 0.5, 0.1, 0.1),
            BoundingBox::new(0, 0.5, 0.5, 0.1, 0.1),
        ];
        let (kept, unexpected) = ClassMap::hit_uav().apply(&boxes, "test");
        assert_eq!(unexpected, 1);
        let ids: Vec<u32> = kept.iter().map(|b| b.class_id).collect();
        assert_eq!(ids, vec![2, 0]);
    }

    #[test]
    fn deserializes_from_json() {
        let map: ClassMap =
            serde_json::from_str(r#"{"mapping": {"1": 0, "3": 1}, "ignore": [0]}"#).unwrap();
        assert_eq!(map.lookup(3), ClassLookup::Mapped(1));
        assert_eq!(map.lookup(0), ClassLookup::Ignored);
        assert!(!map.passthrough);
    }
}
