use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::PhantomConfig;
use crate::error::{PhantomError, Result};
use crate::material::{LookupTable, MaterialLookupBuilder};
use crate::multiscale::MultiscaleDescriptor;
use crate::pyramid::{PyramidBuilder, Shape3};
use crate::staging::{OutputStaging, StagedFile};
use crate::store::{ChunkedStoreWriter, StoreAttributes, write_json};
use crate::volume::LabelVolume;

/// Where one generation run writes its two artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub store: PathBuf,
    pub metadata: PathBuf,
}

impl OutputPaths {
    pub fn new(store: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
            metadata: metadata.into(),
        }
    }

    /// `<dir>/<name>.zarr` and `<dir>/<name>.json`.
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(format!("{name}.zarr")), dir.join(format!("{name}.json")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSummary {
    pub index: usize,
    pub shape: Shape3,
    pub chunk_shape: Shape3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub store: PathBuf,
    pub metadata: PathBuf,
    pub levels: Vec<LevelSummary>,
    pub codes: Vec<i32>,
}

/// Turns label volumes into a published store plus material metadata.
pub struct PhantomOrchestrator {
    config: PhantomConfig,
}

impl PhantomOrchestrator {
    pub fn new(config: PhantomConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PhantomConfig {
        &self.config
    }

    /// Write `volume` as a multiscale store and `lookup` as its material
    /// metadata document.
    ///
    /// Labels are checked against `lookup` before anything on disk changes.
    /// The store is built in a staging directory and only replaces
    /// `out.store` once every level and document has been written. The
    /// metadata document is renamed into place just before the store; if
    /// that last store rename fails, the new document sits next to the
    /// restored previous store.
    ///
    /// # Errors
    ///
    /// [`PhantomError::InvalidLabel`] if the volume holds codes missing from
    /// `lookup`, [`PhantomError::StoreConflict`] if `out.store` cannot be
    /// cleared, [`PhantomError::Io`] for any failed write.
    pub fn generate(
        &self,
        volume: &LabelVolume,
        lookup: &LookupTable,
        groups: &BTreeMap<u32, u32>,
        out: &OutputPaths,
    ) -> Result<GenerationReport> {
        if volume.is_empty() {
            return Err(PhantomError::EmptyVolume);
        }
        lookup.validate()?;
        let codes = volume.distinct_codes();
        lookup.validate_codes(&codes)?;

        let settings = self.config.pyramid;
        let meaningful = PyramidBuilder::meaningful_levels(volume.dim());
        if settings.n_scales > meaningful {
            warn!(
                "{} levels requested for shape {:?}; levels from {meaningful} on have length-1 axes",
                settings.n_scales,
                volume.dim()
            );
        }

        let staging = OutputStaging::acquire(&out.store)?;
        let writer = ChunkedStoreWriter::new(self.config.store.codec);
        writer.create_group(staging.path())?;

        let builder = PyramidBuilder::new(settings);
        let mut descriptor = MultiscaleDescriptor::new(volume.voxel_size);
        let mut levels = Vec::with_capacity(settings.n_scales);
        for level in builder.levels(volume) {
            writer.write(staging.path(), &level)?;
            descriptor.push_level(&level);
            levels.push(LevelSummary {
                index: level.index,
                shape: level.shape(),
                chunk_shape: level.chunk_shape,
            });
        }

        let (sz, sy, sx) = volume.voxel_size;
        writer.write_metadata(
            staging.path(),
            &StoreAttributes {
                lookup: lookup.aliases(),
                voxel_size: [sz, sy, sx],
                multiscales: vec![descriptor],
            },
        )?;

        let metadata = MaterialLookupBuilder::new(lookup)
            .with_groups(groups)
            .build(volume.voxel_size);
        let metadata_file = StagedFile::write(&out.metadata, |path| write_json(path, &metadata))?;

        // metadata first: if it cannot be placed, dropping `staging` restores
        // the previous store and both artifacts stay as they were
        let metadata = metadata_file.commit()?;
        let store = staging.commit()?;
        info!(
            "generated {} ({} levels) and {}",
            store.display(),
            levels.len(),
            metadata.display()
        );

        Ok(GenerationReport {
            store,
            metadata,
            levels,
            codes: codes.into_iter().collect(),
        })
    }

    /// Generate the named preset into `<dir>/<name>.zarr` + `<dir>/<name>.json`.
    pub fn generate_preset(&self, name: &str, dir: impl AsRef<Path>) -> Result<GenerationReport> {
        let preset = self.config.preset(name)?;
        let lookup = self.config.material_table(&preset.materials)?;
        let volume = preset.generate()?;
        info!(
            "generated {name} phantom {:?}, voxel size {:?}",
            volume.dim(),
            volume.voxel_size
        );
        self.generate(
            &volume,
            lookup,
            &preset.groups,
            &OutputPaths::in_dir(dir, &preset.name),
        )
    }

    pub fn generate_all(&self, dir: impl AsRef<Path>) -> Result<Vec<GenerationReport>> {
        self.config
            .presets
            .iter()
            .map(|preset| self.generate_preset(&preset.name, dir.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::brain_materials;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_label_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let out = OutputPaths::in_dir(dir.path(), "bad");
        std::fs::create_dir(&out.store).unwrap();
        std::fs::write(out.store.join("keep"), b"previous").unwrap();

        let mut data = Array3::zeros((4, 4, 4));
        data[[1, 2, 3]] = 6;
        let volume = LabelVolume::new(data, (1.0, 1.0, 1.0));

        let orchestrator = PhantomOrchestrator::new(PhantomConfig::default()).unwrap();
        let result = orchestrator.generate(&volume, &brain_materials(), &BTreeMap::new(), &out);
        match result {
            Err(PhantomError::InvalidLabel { codes }) => assert_eq!(codes, vec![6]),
            other => panic!("expected InvalidLabel, got {other:?}"),
        }
        assert!(out.store.join("keep").exists());
        assert!(!out.metadata.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_volume_rejected() {
        let dir = TempDir::new().unwrap();
        let volume = LabelVolume::new(Array3::zeros((0, 4, 4)), (1.0, 1.0, 1.0));
        let orchestrator = PhantomOrchestrator::new(PhantomConfig::default()).unwrap();
        let result = orchestrator.generate(
            &volume,
            &brain_materials(),
            &BTreeMap::new(),
            &OutputPaths::in_dir(dir.path(), "empty"),
        );
        assert!(matches!(result, Err(PhantomError::EmptyVolume)));
    }

    #[test]
    fn test_unplaceable_metadata_restores_store() {
        let dir = TempDir::new().unwrap();
        let out = OutputPaths::in_dir(dir.path(), "blocked");
        std::fs::create_dir(&out.store).unwrap();
        std::fs::write(out.store.join("keep"), b"previous").unwrap();
        // a non-empty directory cannot be replaced by a file rename
        std::fs::create_dir(&out.metadata).unwrap();
        std::fs::write(out.metadata.join("occupant"), b"").unwrap();

        let volume = LabelVolume::new(Array3::from_elem((4, 4, 4), 1), (1.0, 1.0, 1.0));
        let orchestrator = PhantomOrchestrator::new(PhantomConfig::default()).unwrap();
        let result = orchestrator.generate(&volume, &brain_materials(), &BTreeMap::new(), &out);

        assert!(matches!(result, Err(PhantomError::Io { .. })));
        assert!(out.store.join("keep").exists());
        assert!(!out.store.join("0").exists());
        assert!(out.metadata.join("occupant").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_output_paths() {
        let out = OutputPaths::in_dir("/tmp/run", "phantom_brain");
        assert_eq!(out.store, PathBuf::from("/tmp/run/phantom_brain.zarr"));
        assert_eq!(out.metadata, PathBuf::from("/tmp/run/phantom_brain.json"));
    }
}
