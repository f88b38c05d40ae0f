use serde::{Deserialize, Serialize};

/// Ordering applied to the slices of a DICOM series before stacking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Chunk codec of the array nodes. Every variant is lossless.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Raw,
    Zlib { level: u32 },
    Gzip { level: u32 },
}

/// What the pyramid builder does once a level already has a length-1 axis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Always emit the requested number of levels.
    #[default]
    Keep,
    /// Stop before a level that could no longer be halved on some axis.
    Truncate,
}

/// Physical property a label volume can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyField {
    Density,
    Mu,
}
