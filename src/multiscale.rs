use serde::{Deserialize, Serialize};

use crate::pyramid::PyramidLevel;
use crate::volume::VoxelSize;

pub const MULTISCALE_VERSION: &str = "0.4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoordinateTransformation {
    Scale { scale: [f64; 3] },
    Translation { translation: [f64; 3] },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    #[serde(rename = "type")]
    pub axis_type: String,
}

impl Axis {
    fn space(name: &str) -> Self {
        Self {
            name: name.to_string(),
            axis_type: "space".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub path: String,

    // scale first, then translation
    #[serde(rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

impl Dataset {
    pub fn for_level(level: &PyramidLevel) -> Self {
        let scale = level.scale();
        let translation = level.translation();
        Self {
            path: level.path(),
            coordinate_transformations: vec![
                CoordinateTransformation::Scale { scale: [scale; 3] },
                CoordinateTransformation::Translation {
                    translation: [translation; 3],
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiscaleMetadata {
    pub voxel_size: [f64; 3],
}

/// Document tying the levels of one pyramid to their physical frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiscaleDescriptor {
    pub version: String,
    pub axes: Vec<Axis>,
    // ordered by level index, highest resolution first
    pub datasets: Vec<Dataset>,
    #[serde(rename = "type")]
    pub image_type: String,
    pub metadata: MultiscaleMetadata,
}

impl MultiscaleDescriptor {
    /// Descriptor with no datasets yet; see [`push_level`](Self::push_level).
    pub fn new(voxel_size: VoxelSize) -> Self {
        let (sz, sy, sx) = voxel_size;
        Self {
            version: MULTISCALE_VERSION.to_string(),
            axes: vec![Axis::space("z"), Axis::space("y"), Axis::space("x")],
            datasets: Vec::new(),
            image_type: "image".to_string(),
            metadata: MultiscaleMetadata {
                voxel_size: [sz, sy, sx],
            },
        }
    }

    pub fn compose<'a>(levels: impl IntoIterator<Item = &'a PyramidLevel>, voxel_size: VoxelSize) -> Self {
        let mut descriptor = Self::new(voxel_size);
        for level in levels {
            descriptor.push_level(level);
        }
        descriptor
    }

    pub fn push_level(&mut self, level: &PyramidLevel) {
        debug_assert_eq!(level.index, self.datasets.len(), "levels must arrive in order");
        self.datasets.push(Dataset::for_level(level));
    }

    pub fn n_scales(&self) -> usize {
        self.datasets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::DegeneratePolicy;
    use crate::pyramid::{PyramidBuilder, PyramidSettings};
    use crate::volume::LabelVolume;
    use ndarray::Array3;

    fn scenario_descriptor() -> MultiscaleDescriptor {
        let volume = LabelVolume::new(Array3::zeros((64, 128, 128)), (2.0, 2.0, 2.0));
        let levels = PyramidBuilder::new(PyramidSettings {
            n_scales: 3,
            base_chunk: (64, 128, 128),
            degenerate_policy: DegeneratePolicy::Keep,
        })
        .build(&volume);
        MultiscaleDescriptor::compose(&levels, volume.voxel_size)
    }

    #[test]
    fn test_scenario_transforms() {
        let descriptor = scenario_descriptor();
        assert_eq!(descriptor.n_scales(), 3);

        let expected = [(1.0, 0.0), (2.0, 0.5), (4.0, 1.5)];
        for (index, (dataset, (scale, translation))) in
            descriptor.datasets.iter().zip(expected).enumerate()
        {
            assert_eq!(dataset.path, index.to_string());
            assert_eq!(
                dataset.coordinate_transformations,
                vec![
                    CoordinateTransformation::Scale { scale: [scale; 3] },
                    CoordinateTransformation::Translation {
                        translation: [translation; 3]
                    },
                ]
            );
        }
    }

    #[test]
    fn test_json_layout() {
        let value = serde_json::to_value(scenario_descriptor()).unwrap();
        assert_eq!(value["version"], "0.4");
        assert_eq!(value["type"], "image");
        assert_eq!(value["axes"][0], serde_json::json!({"name": "z", "type": "space"}));
        assert_eq!(value["axes"][2]["name"], "x");
        assert_eq!(value["metadata"]["voxel_size"], serde_json::json!([2.0, 2.0, 2.0]));
        assert_eq!(
            value["datasets"][1]["coordinateTransformations"],
            serde_json::json!([
                {"type": "scale", "scale": [2.0, 2.0, 2.0]},
                {"type": "translation", "translation": [0.5, 0.5, 0.5]}
            ])
        );
    }
}
