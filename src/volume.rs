use std::collections::BTreeSet;

use ndarray::{Array3, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::enums::PropertyField;
use crate::error::Result;
use crate::material::LookupTable;

/// Voxel edge lengths `(sz, sy, sx)` in physical units.
pub type VoxelSize = (f64, f64, f64);

/// Volume of integer material codes, indexed `(z, y, x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVolume {
    pub data: Array3<i32>,
    pub voxel_size: VoxelSize,
}

impl LabelVolume {
    pub fn new(data: Array3<i32>, voxel_size: VoxelSize) -> Self {
        Self { data, voxel_size }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<i32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<i32> {
        &mut self.data
    }

    pub fn voxel_size(&self) -> VoxelSize {
        self.voxel_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every distinct code present in the volume, ascending.
    pub fn distinct_codes(&self) -> BTreeSet<i32> {
        self.data
            .par_iter()
            .fold(BTreeSet::new, |mut codes, &code| {
                codes.insert(code);
                codes
            })
            .reduce(BTreeSet::new, |mut left, right| {
                left.extend(right);
                left
            })
    }

    /// Replace every code by the chosen physical property of its material.
    ///
    /// # Errors
    ///
    /// Returns [`PhantomError::InvalidLabel`](crate::PhantomError::InvalidLabel)
    /// if the volume holds a code the lookup does not know.
    pub fn map_property(&self, lookup: &LookupTable, field: PropertyField) -> Result<Array3<f32>> {
        lookup.validate_codes(&self.distinct_codes())?;

        Ok(Zip::from(&self.data).par_map_collect(|&code| {
            let entry = u32::try_from(code).ok().and_then(|code| lookup.get(code));
            match (entry, field) {
                (Some(entry), PropertyField::Density) => entry.density as f32,
                (Some(entry), PropertyField::Mu) => entry.mu as f32,
                (None, _) => 0.0,
            }
        }))
    }
}

/// Raw intensity volume as read from an external scan, indexed `(z, y, x)`.
#[derive(Debug, Default, Clone)]
pub struct ScanVolume {
    pub data: Array3<u16>,
    pub spacing: VoxelSize,
}

impl ScanVolume {
    pub fn new(data: Array3<u16>, spacing: VoxelSize) -> Self {
        Self { data, spacing }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Classify every voxel into a material code.
    pub fn label(&self, labeler: &ThresholdLabeler) -> LabelVolume {
        let data = Zip::from(&self.data).par_map_collect(|&value| labeler.code_for(value));
        LabelVolume::new(data, self.spacing)
    }

    /// Read the pixel values themselves as material codes, for scans that
    /// are already segmented.
    pub fn into_labels(self) -> LabelVolume {
        LabelVolume::new(self.data.mapv(i32::from), self.spacing)
    }
}

/// Half-open intensity interval `(lower, upper]` assigned to one code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub lower: u16,
    /// `None` means unbounded above.
    pub upper: Option<u16>,
    pub code: i32,
}

impl ThresholdBand {
    fn contains(&self, value: u16) -> bool {
        value > self.lower && self.upper.is_none_or(|upper| value <= upper)
    }
}

/// Maps intensities to material codes; the first matching band wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLabeler {
    pub bands: Vec<ThresholdBand>,
    #[serde(default)]
    pub unmatched: i32,
}

impl ThresholdLabeler {
    /// Gray matter, white matter and ventricles over air.
    pub fn cerebral() -> Self {
        Self {
            bands: vec![
                ThresholdBand {
                    lower: 30,
                    upper: Some(80),
                    code: 1,
                },
                ThresholdBand {
                    lower: 80,
                    upper: Some(150),
                    code: 2,
                },
                ThresholdBand {
                    lower: 150,
                    upper: None,
                    code: 3,
                },
            ],
            unmatched: 0,
        }
    }

    #[inline]
    pub fn code_for(&self, value: u16) -> i32 {
        self.bands
            .iter()
            .find(|band| band.contains(value))
            .map_or(self.unmatched, |band| band.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialEntry;
    use ndarray::array;

    #[test]
    fn test_distinct_codes_sorted() {
        let volume = LabelVolume::new(array![[[3, 1], [1, 0]], [[3, 3], [7, 0]]], (1.0, 1.0, 1.0));
        let codes: Vec<i32> = volume.distinct_codes().into_iter().collect();
        assert_eq!(codes, vec![0, 1, 3, 7]);
    }

    #[test]
    fn test_cerebral_bands() {
        let labeler = ThresholdLabeler::cerebral();
        assert_eq!(labeler.code_for(0), 0);
        assert_eq!(labeler.code_for(30), 0);
        assert_eq!(labeler.code_for(31), 1);
        assert_eq!(labeler.code_for(80), 1);
        assert_eq!(labeler.code_for(81), 2);
        assert_eq!(labeler.code_for(150), 2);
        assert_eq!(labeler.code_for(151), 3);
        assert_eq!(labeler.code_for(u16::MAX), 3);
    }

    #[test]
    fn test_scan_label_keeps_spacing() {
        let scan = ScanVolume::new(array![[[10, 50], [100, 200]]], (0.1, 0.2, 0.3));
        let labels = scan.label(&ThresholdLabeler::cerebral());
        assert_eq!(labels.data, array![[[0, 1], [2, 3]]]);
        assert_eq!(labels.voxel_size, (0.1, 0.2, 0.3));

        let segmented = scan.into_labels();
        assert_eq!(segmented.data, array![[[10, 50], [100, 200]]]);
    }

    #[test]
    fn test_map_property() {
        let mut lookup = LookupTable::default();
        lookup.insert(0, MaterialEntry::new("air", 0.0012, 0.0));
        lookup.insert(1, MaterialEntry::new("bone", 1.85, 0.5));
        let volume = LabelVolume::new(array![[[0, 1]]], (1.0, 1.0, 1.0));

        let density = volume.map_property(&lookup, PropertyField::Density).unwrap();
        assert_eq!(density, array![[[0.0012f32, 1.85]]]);
        let mu = volume.map_property(&lookup, PropertyField::Mu).unwrap();
        assert_eq!(mu, array![[[0.0f32, 0.5]]]);
    }

    #[test]
    fn test_map_property_rejects_unknown_code() {
        let mut lookup = LookupTable::default();
        lookup.insert(0, MaterialEntry::new("air", 0.0012, 0.0));
        let volume = LabelVolume::new(array![[[0, 2]]], (1.0, 1.0, 1.0));
        assert!(volume.map_property(&lookup, PropertyField::Density).is_err());
    }
}
