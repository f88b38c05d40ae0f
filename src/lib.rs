//! # phantom-pyramid
//!
//! Persists labeled 3-D phantoms (one integer material code per voxel) as
//! multiscale Zarr v2 stores, together with the material metadata an X-ray
//! scan/dose simulator needs to resolve every code to a density and an
//! attenuation coefficient.
//!
//! One generation run produces:
//!  - `<name>.zarr/` with one array node per resolution level (`0`, `1`, ...),
//!    root attributes `lookup`, `voxel_size` and `multiscales`, and a
//!    `multiscale.json` sidecar holding the same multiscale document
//!  - `<name>.json` with `voxel_size`, the authoritative `lookup` table and
//!    the `regions` list
//!
//! Level `k` keeps every second voxel of level `k - 1` on each axis. Labels are
//! selected, not averaged, so no level ever contains a code the input did not.
//! Each level carries a scale of `2^k` and a translation of `2^k / 2 - 0.5`
//! so all levels line up in the physical frame of level 0.
//!
//! Label volumes can be generated from ellipsoid presets, or loaded from a
//! DICOM series, a multi-page TIFF or a directory of image slices and
//! classified by intensity thresholds.
//!
//! # Examples
//!
//! ## Writing the default brain phantom
//!
//! ```no_run
//! # use phantom_pyramid::{PhantomConfig, PhantomOrchestrator};
//! let orchestrator = PhantomOrchestrator::new(PhantomConfig::default())
//!     .expect("default configuration should be valid");
//! let report = orchestrator
//!     .generate_preset("brain", ".")
//!     .expect("should have written phantom_brain store");
//! println!("{} levels in {}", report.levels.len(), report.store.display());
//! ```
//!
//! ## Labeling a DICOM series
//!
//! ```no_run
//! # use phantom_pyramid::{PhantomConfig, PhantomOrchestrator, OutputPaths, SortBy, ThresholdLabeler, VolumeLoader, config::cerebral_materials};
//! # use std::collections::BTreeMap;
//! let scan = VolumeLoader::load_from_directory("dicom", SortBy::InstanceNumber)
//!     .expect("should have loaded files from directory");
//! let labels = scan.label(&ThresholdLabeler::cerebral());
//! let orchestrator = PhantomOrchestrator::new(PhantomConfig::default()).unwrap();
//! orchestrator
//!     .generate(
//!         &labels,
//!         &cerebral_materials(),
//!         &BTreeMap::new(),
//!         &OutputPaths::in_dir(".", "brain_cerebral"),
//!     )
//!     .expect("should have written brain_cerebral store");
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod material;
pub mod multiscale;
pub mod orchestrator;
pub mod phantom;
pub mod pyramid;
pub mod staging;
pub mod store;
pub mod volume;
pub mod volume_loader;

pub use config::PhantomConfig;
pub use enums::{Codec, DegeneratePolicy, PropertyField, SortBy};
pub use error::{PhantomError, Result};
pub use material::{LookupTable, MaterialEntry, MaterialLookupBuilder, MaterialMetadata, Region};
pub use multiscale::MultiscaleDescriptor;
pub use orchestrator::{GenerationReport, OutputPaths, PhantomOrchestrator};
pub use phantom::{Ellipsoid, PhantomPreset};
pub use pyramid::{PyramidBuilder, PyramidLevel, PyramidSettings};
pub use store::{ChunkedStoreWriter, StoreAttributes, ZarrStore};
pub use volume::{LabelVolume, ScanVolume, ThresholdLabeler};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
