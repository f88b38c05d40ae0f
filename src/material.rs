//! Material lookup tables and the companion region list.
//!
//! The [`LookupTable`] written into the material-metadata document is the
//! authoritative mapping from label code to physical properties. Codes are
//! kept as integers in memory and only become strings at the JSON boundary.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{PhantomError, Result};
use crate::volume::VoxelSize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub name: String,
    /// g/cm³
    pub density: f64,
    /// Linear attenuation coefficient at the reference energy.
    #[serde(default)]
    pub mu: f64,
    /// Element symbol to mass fraction.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub composition: BTreeMap<String, f64>,
}

impl MaterialEntry {
    pub fn new(name: impl Into<String>, density: f64, mu: f64) -> Self {
        Self {
            name: name.into(),
            density,
            mu,
            composition: BTreeMap::new(),
        }
    }

    pub fn with_composition<'a>(mut self, fractions: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        self.composition = fractions
            .into_iter()
            .map(|(element, fraction)| (element.to_string(), fraction))
            .collect();
        self
    }
}

/// Code to material mapping, ordered by numeric code.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupTable(BTreeMap<u32, MaterialEntry>);

/// Entry of the store-side convenience lookup: `{code: {"alias": name}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialAlias {
    pub alias: String,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: u32, entry: MaterialEntry) -> Option<MaterialEntry> {
        self.0.insert(code, entry)
    }

    pub fn get(&self, code: u32) -> Option<&MaterialEntry> {
        self.0.get(&code)
    }

    pub fn contains(&self, code: u32) -> bool {
        self.0.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &MaterialEntry)> {
        self.0.iter().map(|(code, entry)| (*code, entry))
    }

    /// Check that every code has a lookup entry.
    ///
    /// # Errors
    ///
    /// Returns [`PhantomError::InvalidLabel`] listing every code without an
    /// entry. Negative codes never have one.
    pub fn validate_codes(&self, codes: &BTreeSet<i32>) -> Result<()> {
        let missing: Vec<i64> = codes
            .iter()
            .filter(|&&code| u32::try_from(code).map_or(true, |code| !self.contains(code)))
            .map(|&code| i64::from(code))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PhantomError::InvalidLabel { codes: missing })
        }
    }

    /// Reject entries with negative or non-finite physical properties.
    pub fn validate(&self) -> Result<()> {
        for (code, entry) in self.iter() {
            let valid = |value: f64| value.is_finite() && value >= 0.0;
            if !valid(entry.density) || !valid(entry.mu) {
                return Err(PhantomError::InvalidConfig(format!(
                    "material {code} ({}) needs finite, non-negative density and mu",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Derived `{code: {"alias": name}}` view stored as a store attribute.
    pub fn aliases(&self) -> BTreeMap<u32, MaterialAlias> {
        self.iter()
            .map(|(code, entry)| {
                (
                    code,
                    MaterialAlias {
                        alias: entry.name.clone(),
                    },
                )
            })
            .collect()
    }
}

impl FromIterator<(u32, MaterialEntry)> for LookupTable {
    fn from_iter<I: IntoIterator<Item = (u32, MaterialEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "GroupID")]
    pub group_id: u32,
}

/// The material-metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialMetadata {
    pub voxel_size: [f64; 3],
    pub lookup: LookupTable,
    pub regions: Vec<Region>,
}

/// Builds [`MaterialMetadata`] from a lookup table.
#[derive(Debug, Clone)]
pub struct MaterialLookupBuilder<'a> {
    lookup: &'a LookupTable,
    groups: BTreeMap<u32, u32>,
}

impl<'a> MaterialLookupBuilder<'a> {
    pub fn new(lookup: &'a LookupTable) -> Self {
        Self {
            lookup,
            groups: BTreeMap::new(),
        }
    }

    /// Simulate `code` as part of `group` instead of on its own.
    pub fn with_group(mut self, code: u32, group: u32) -> Self {
        self.groups.insert(code, group);
        self
    }

    pub fn with_groups(mut self, groups: &BTreeMap<u32, u32>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn regions(&self) -> Vec<Region> {
        self.lookup
            .codes()
            .map(|id| Region {
                id,
                group_id: self.groups.get(&id).copied().unwrap_or(id),
            })
            .collect()
    }

    pub fn build(&self, voxel_size: VoxelSize) -> MaterialMetadata {
        let (sz, sy, sx) = voxel_size;
        MaterialMetadata {
            voxel_size: [sz, sy, sx],
            lookup: self.lookup.clone(),
            regions: self.regions(),
        }
    }
}
