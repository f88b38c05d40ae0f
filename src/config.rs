//! Versioned generation settings: material tables, phantom presets and the
//! pyramid/store parameters shared by every run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::enums::Codec;
use crate::error::{PhantomError, Result};
use crate::material::{LookupTable, MaterialEntry};
use crate::phantom::PhantomPreset;
use crate::pyramid::PyramidSettings;
use crate::store::read_json;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub codec: Codec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhantomConfig {
    pub version: u32,
    #[serde(default)]
    pub pyramid: PyramidSettings,
    #[serde(default)]
    pub store: StoreSettings,
    pub materials: BTreeMap<String, LookupTable>,
    #[serde(default)]
    pub presets: Vec<PhantomPreset>,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            pyramid: PyramidSettings::default(),
            store: StoreSettings::default(),
            materials: BTreeMap::from([
                ("brain".to_string(), brain_materials()),
                ("cerebral".to_string(), cerebral_materials()),
            ]),
            presets: vec![PhantomPreset::brain()],
        }
    }
}

impl PhantomConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(PhantomError::InvalidConfig(format!(
                "unsupported configuration version {} (expected {CONFIG_VERSION})",
                self.version
            )));
        }

        let PyramidSettings {
            n_scales,
            base_chunk: (cz, cy, cx),
            ..
        } = self.pyramid;
        if n_scales == 0 {
            return Err(PhantomError::InvalidConfig("n_scales must be at least 1".to_string()));
        }
        if cz == 0 || cy == 0 || cx == 0 {
            return Err(PhantomError::InvalidConfig(format!(
                "base_chunk {:?} has a zero-length axis",
                self.pyramid.base_chunk
            )));
        }

        if let Codec::Zlib { level } | Codec::Gzip { level } = self.store.codec {
            if level > 9 {
                return Err(PhantomError::InvalidConfig(format!(
                    "compression level {level} is outside 0..=9"
                )));
            }
        }

        for table in self.materials.values() {
            table.validate()?;
        }
        for preset in &self.presets {
            self.material_table(&preset.materials)?;
            preset.validate()?;
        }
        Ok(())
    }

    pub fn material_table(&self, name: &str) -> Result<&LookupTable> {
        self.materials
            .get(name)
            .ok_or_else(|| PhantomError::UnknownMaterialTable(name.to_string()))
    }

    pub fn preset(&self, name: &str) -> Result<&PhantomPreset> {
        self.presets
            .iter()
            .find(|preset| preset.name == name)
            .ok_or_else(|| PhantomError::UnknownPreset(name.to_string()))
    }
}

/// Regions of the simplified brain phantom, with attenuation.
pub fn brain_materials() -> LookupTable {
    [
        (0, MaterialEntry::new("air", 0.0012, 0.0)),
        (1, MaterialEntry::new("gyrus corticali", 1.03, 0.19)),
        (2, MaterialEntry::new("ippocampo + amigdala", 1.04, 0.2)),
        (3, MaterialEntry::new("insula", 1.045, 0.21)),
        (4, MaterialEntry::new("globo pallidus + putamen", 1.05, 0.23)),
        (5, MaterialEntry::new("altro", 1.06, 0.25)),
    ]
    .into_iter()
    .collect()
}

/// Tissues produced by [`ThresholdLabeler::cerebral`](crate::volume::ThresholdLabeler::cerebral).
pub fn cerebral_materials() -> LookupTable {
    [
        (0, MaterialEntry::new("air", 0.0012, 0.0)),
        (
            1,
            MaterialEntry::new("gray_matter", 1.04, 0.0)
                .with_composition([("H", 10.0), ("C", 5.0), ("N", 1.0), ("O", 4.0)]),
        ),
        (
            2,
            MaterialEntry::new("white_matter", 1.03, 0.0)
                .with_composition([("H", 11.0), ("C", 6.0), ("N", 1.0), ("O", 5.0)]),
        ),
        (
            3,
            MaterialEntry::new("ventricles", 1.0, 0.0).with_composition([("H", 2.0), ("O", 1.0)]),
        ),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::DegeneratePolicy;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = PhantomConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pyramid.n_scales, 3);
        assert_eq!(config.pyramid.base_chunk, (64, 128, 128));
        assert_eq!(config.store.codec, Codec::Raw);
        assert_eq!(config.material_table("brain").unwrap().len(), 6);
        assert_eq!(config.preset("brain").unwrap().materials, "brain");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "pyramid": {"n_scales": 5, "degenerate_policy": "truncate"},
                "store": {"codec": {"id": "zlib", "level": 4}},
                "materials": {"water": {"0": {"name": "water", "density": 1.0, "mu": 0.2}}}
            }"#,
        )
        .unwrap();

        let config = PhantomConfig::from_path(&path).unwrap();
        assert_eq!(config.pyramid.n_scales, 5);
        assert_eq!(config.pyramid.base_chunk, (64, 128, 128));
        assert_eq!(config.pyramid.degenerate_policy, DegeneratePolicy::Truncate);
        assert_eq!(config.store.codec, Codec::Zlib { level: 4 });
        assert!(config.presets.is_empty());
        assert_eq!(config.material_table("water").unwrap().get(0).unwrap().mu, 0.2);
    }

    #[test]
    fn test_rejections() {
        let mut config = PhantomConfig::default();
        config.version = 2;
        assert!(matches!(config.validate(), Err(PhantomError::InvalidConfig(_))));

        let mut config = PhantomConfig::default();
        config.pyramid.n_scales = 0;
        assert!(matches!(config.validate(), Err(PhantomError::InvalidConfig(_))));

        let mut config = PhantomConfig::default();
        config.pyramid.base_chunk = (64, 0, 64);
        assert!(matches!(config.validate(), Err(PhantomError::InvalidConfig(_))));

        let mut config = PhantomConfig::default();
        config.store.codec = Codec::Gzip { level: 12 };
        assert!(matches!(config.validate(), Err(PhantomError::InvalidConfig(_))));

        let mut config = PhantomConfig::default();
        config.presets[0].materials = "missing".to_string();
        assert!(matches!(config.validate(), Err(PhantomError::UnknownMaterialTable(_))));

        assert!(matches!(
            PhantomConfig::default().preset("liver"),
            Err(PhantomError::UnknownPreset(_))
        ));
    }
}
