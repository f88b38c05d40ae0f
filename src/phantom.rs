use std::collections::BTreeMap;

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PhantomError, Result};
use crate::pyramid::Shape3;
use crate::volume::{LabelVolume, VoxelSize};

/// Solid ellipsoid painted with one material code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Offset `(z, y, x)` from the volume center, in voxels.
    pub center: [f64; 3],
    /// Semi-axes as fractions of the volume extent on each axis.
    pub semi_axes: [f64; 3],
    pub code: i32,
}

impl Ellipsoid {
    #[inline]
    fn contains(&self, offset: [f64; 3], shape: [f64; 3]) -> bool {
        (0..3)
            .map(|axis| {
                let d = offset[axis] - self.center[axis];
                let r = shape[axis] * self.semi_axes[axis];
                d * d / (r * r)
            })
            .sum::<f64>()
            <= 1.0
    }
}

/// Named analytic phantom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhantomPreset {
    pub name: String,
    pub shape: Shape3,
    pub voxel_size: VoxelSize,
    /// Name of the material table the codes refer to.
    pub materials: String,
    /// Painted in order; later ellipsoids overwrite earlier ones.
    pub ellipsoids: Vec<Ellipsoid>,
    /// Code for voxels left at 0 after painting.
    #[serde(default)]
    pub background: Option<i32>,
    /// Region group overrides, code to group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<u32, u32>,
}

impl PhantomPreset {
    /// Simplified brain: cortex shell with hippocampus/amygdala, insula and
    /// pallidus/putamen inclusions. Nothing is left as air.
    pub fn brain() -> Self {
        let ellipsoid = |center: [f64; 3], fraction: f64, code| Ellipsoid {
            center,
            semi_axes: [fraction; 3],
            code,
        };
        Self {
            name: "brain".to_string(),
            shape: (64, 128, 128),
            voxel_size: (2.0, 2.0, 2.0),
            materials: "brain".to_string(),
            ellipsoids: vec![
                Ellipsoid {
                    center: [0.0, 0.0, 0.0],
                    semi_axes: [0.4, 0.45, 0.45],
                    code: 1,
                },
                ellipsoid([-10.0, 10.0, 10.0], 0.15, 2),
                ellipsoid([5.0, -15.0, -5.0], 0.1, 3),
                ellipsoid([8.0, 12.0, 8.0], 0.12, 4),
            ],
            background: Some(5),
            groups: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (z, y, x) = self.shape;
        if z == 0 || y == 0 || x == 0 {
            return Err(PhantomError::InvalidConfig(format!(
                "preset {}: shape {:?} has a zero-length axis",
                self.name, self.shape
            )));
        }
        let (sz, sy, sx) = self.voxel_size;
        if [sz, sy, sx].iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(PhantomError::InvalidConfig(format!(
                "preset {}: voxel size must be positive",
                self.name
            )));
        }
        if let Some(bad) = self
            .ellipsoids
            .iter()
            .find(|e| e.semi_axes.iter().any(|a| !a.is_finite() || *a <= 0.0))
        {
            return Err(PhantomError::InvalidConfig(format!(
                "preset {}: ellipsoid for code {} needs positive semi-axes",
                self.name, bad.code
            )));
        }
        Ok(())
    }

    pub fn generate(&self) -> Result<LabelVolume> {
        self.validate()?;

        let (nz, ny, nx) = self.shape;
        let extent = [nz as f64, ny as f64, nx as f64];
        let center = extent.map(|n| (n - 1.0) / 2.0);

        let mut data = Array3::<i32>::zeros(self.shape);
        Zip::indexed(&mut data).par_for_each(|(z, y, x), code| {
            let offset = [
                z as f64 - center[0],
                y as f64 - center[1],
                x as f64 - center[2],
            ];
            *code = self
                .ellipsoids
                .iter()
                .rev()
                .find(|e| e.contains(offset, extent))
                .map_or(0, |e| e.code);
            if *code == 0 {
                if let Some(background) = self.background {
                    *code = background;
                }
            }
        });

        Ok(LabelVolume::new(data, self.voxel_size))
    }
}
