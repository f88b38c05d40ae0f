use log::warn;
use ndarray::{Array3, s};
use serde::{Deserialize, Serialize};

use crate::enums::DegeneratePolicy;
use crate::volume::LabelVolume;

/// Chunk / array extent `(z, y, x)`.
pub type Shape3 = (usize, usize, usize);

/// One resolution level of the pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub index: usize,
    pub data: Array3<i32>,
    pub chunk_shape: Shape3,
}

impl PyramidLevel {
    pub fn shape(&self) -> Shape3 {
        self.data.dim()
    }

    /// Store path of this level: its index as a string.
    pub fn path(&self) -> String {
        self.index.to_string()
    }

    /// Uniform scale factor relative to level 0.
    pub fn scale(&self) -> f64 {
        2f64.powi(self.index as i32)
    }

    /// Offset of the first sample of this level in level-0 voxel units.
    pub fn translation(&self) -> f64 {
        self.scale() / 2.0 - 0.5
    }
}

/// Clamp `base` so no axis exceeds the array's own extent.
pub fn clamp_chunk_shape(base: Shape3, shape: Shape3) -> Shape3 {
    (base.0.min(shape.0), base.1.min(shape.1), base.2.min(shape.2))
}

/// Keep every second voxel along each axis, starting at offset 0.
///
/// Labels are selected, never averaged, so codes survive exactly. A length-1
/// axis stays length 1.
pub fn decimate(data: &Array3<i32>) -> Array3<i32> {
    data.slice(s![..;2, ..;2, ..;2]).to_owned()
}

/// True once some axis can no longer be halved.
fn has_unit_axis(shape: Shape3) -> bool {
    shape.0 <= 1 || shape.1 <= 1 || shape.2 <= 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidSettings {
    pub n_scales: usize,
    pub base_chunk: Shape3,
    pub degenerate_policy: DegeneratePolicy,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        Self {
            n_scales: 3,
            base_chunk: (64, 128, 128),
            degenerate_policy: DegeneratePolicy::Keep,
        }
    }
}

pub struct PyramidBuilder {
    settings: PyramidSettings,
}

impl PyramidBuilder {
    pub fn new(settings: PyramidSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PyramidSettings {
        &self.settings
    }

    /// Lazily produce the levels of `volume`, ordered by index.
    pub fn levels<'a>(&'a self, volume: &'a LabelVolume) -> Levels<'a> {
        Levels {
            settings: &self.settings,
            source: Some(volume),
            pending: None,
            previous_shape: volume.dim(),
            next_index: 0,
        }
    }

    /// Eagerly build every level.
    pub fn build(&self, volume: &LabelVolume) -> Vec<PyramidLevel> {
        self.levels(volume).collect()
    }

    /// Number of levels that can be built before some axis is already length 1.
    ///
    /// A shape with a zero-length axis counts as a single level.
    pub fn meaningful_levels(shape: Shape3) -> usize {
        let mut shape = shape;
        let mut count = 1;
        while !has_unit_axis(shape) {
            shape = (shape.0.div_ceil(2), shape.1.div_ceil(2), shape.2.div_ceil(2));
            count += 1;
        }
        count
    }
}

/// Iterator returned by [`PyramidBuilder::levels`].
///
/// Each level is moved out as it is yielded; only the decimated array for the
/// level after it is kept.
pub struct Levels<'a> {
    settings: &'a PyramidSettings,
    source: Option<&'a LabelVolume>,
    pending: Option<Array3<i32>>,
    previous_shape: Shape3,
    next_index: usize,
}

impl Iterator for Levels<'_> {
    type Item = PyramidLevel;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.settings.n_scales {
            return None;
        }
        let index = self.next_index;

        let data = match (self.source.take(), self.pending.take()) {
            (Some(volume), _) => volume.data.clone(),
            (None, Some(pending)) => {
                if has_unit_axis(self.previous_shape) {
                    match self.settings.degenerate_policy {
                        DegeneratePolicy::Truncate => {
                            warn!(
                                "stopping pyramid at {index} levels: level {} has shape {:?}",
                                index - 1,
                                self.previous_shape
                            );
                            self.next_index = self.settings.n_scales;
                            return None;
                        }
                        DegeneratePolicy::Keep => warn!(
                            "level {index} is degenerate: level {} already has shape {:?}",
                            index - 1,
                            self.previous_shape
                        ),
                    }
                }
                pending
            }
            (None, None) => return None,
        };

        self.next_index += 1;
        if self.next_index < self.settings.n_scales {
            self.pending = Some(decimate(&data));
        }
        self.previous_shape = data.dim();
        Some(PyramidLevel {
            index,
            chunk_shape: clamp_chunk_shape(self.settings.base_chunk, data.dim()),
            data,
        })
    }
}
