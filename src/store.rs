//! Zarr v2 directory store.
//!
//! Layout written by [`ChunkedStoreWriter`]:
//!
//! ```text
//! store.zarr/
//!   .zgroup            {"zarr_format": 2}
//!   .zattrs            lookup, voxel_size, multiscales
//!   multiscale.json    [descriptor]
//!   0/.zarray          one array node per pyramid level
//!   0/0.0.0            chunks, C order, little-endian i32
//!   1/...
//! ```
//!
//! Edge chunks are written at full chunk size, padded with [`FILL_VALUE`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use log::debug;
use ndarray::{Array3, s};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::enums::Codec;
use crate::error::{PhantomError, Result};
use crate::material::MaterialAlias;
use crate::multiscale::MultiscaleDescriptor;
use crate::pyramid::{PyramidLevel, Shape3, clamp_chunk_shape};

pub const ZGROUP_FILE: &str = ".zgroup";
pub const ZATTRS_FILE: &str = ".zattrs";
pub const ZARRAY_FILE: &str = ".zarray";
pub const SIDECAR_FILE: &str = "multiscale.json";

pub const ZARR_FORMAT: u8 = 2;
pub const LABEL_DTYPE: &str = "<i4";
pub const FILL_VALUE: i32 = 0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct ZarrGroupMeta {
    zarr_format: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompressorMeta {
    pub id: String,
    pub level: u32,
}

/// Contents of a `.zarray` document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ZarrArrayMeta {
    pub chunks: Vec<usize>,
    pub compressor: Option<CompressorMeta>,
    pub dtype: String,
    pub fill_value: i32,
    pub filters: Option<Vec<serde_json::Value>>,
    pub order: String,
    pub shape: Vec<usize>,
    pub zarr_format: u8,
    #[serde(default = "default_separator")]
    pub dimension_separator: String,
}

fn default_separator() -> String {
    ".".to_string()
}

impl ZarrArrayMeta {
    fn for_array(shape: Shape3, chunk_shape: Shape3, codec: Codec) -> Self {
        let (z, y, x) = shape;
        let (cz, cy, cx) = chunk_shape;
        Self {
            chunks: vec![cz, cy, cx],
            compressor: compressor_meta(codec),
            dtype: LABEL_DTYPE.to_string(),
            fill_value: FILL_VALUE,
            filters: None,
            order: "C".to_string(),
            shape: vec![z, y, x],
            zarr_format: ZARR_FORMAT,
            dimension_separator: default_separator(),
        }
    }

    pub fn codec(&self) -> Result<Codec> {
        match &self.compressor {
            None => Ok(Codec::Raw),
            Some(CompressorMeta { id, level }) => match id.as_str() {
                "zlib" => Ok(Codec::Zlib { level: *level }),
                "gzip" => Ok(Codec::Gzip { level: *level }),
                other => Err(PhantomError::CorruptStore(format!("unsupported compressor {other:?}"))),
            },
        }
    }

    fn dims(&self) -> Result<(Shape3, Shape3)> {
        match (self.shape.as_slice(), self.chunks.as_slice()) {
            (&[z, y, x], &[cz, cy, cx]) if cz > 0 && cy > 0 && cx > 0 => Ok(((z, y, x), (cz, cy, cx))),
            _ => Err(PhantomError::CorruptStore(format!(
                "expected a 3-D array, got shape {:?} chunks {:?}",
                self.shape, self.chunks
            ))),
        }
    }
}

fn compressor_meta(codec: Codec) -> Option<CompressorMeta> {
    match codec {
        Codec::Raw => None,
        Codec::Zlib { level } => Some(CompressorMeta {
            id: "zlib".to_string(),
            level,
        }),
        Codec::Gzip { level } => Some(CompressorMeta {
            id: "gzip".to_string(),
            level,
        }),
    }
}

/// Root attributes of the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreAttributes {
    /// Derived from the authoritative lookup table; names only.
    pub lookup: BTreeMap<u32, MaterialAlias>,
    pub voxel_size: [f64; 3],
    pub multiscales: Vec<MultiscaleDescriptor>,
}

/// One chunk of the regular chunk grid.
struct ChunkCell {
    key: String,
    ranges: [Range<usize>; 3],
}

fn chunk_grid(shape: Shape3, chunks: Shape3) -> impl Iterator<Item = ChunkCell> {
    let axis = |extent: usize, chunk: usize| {
        (0..extent.div_ceil(chunk)).map(move |i| (i, i * chunk..((i + 1) * chunk).min(extent)))
    };
    axis(shape.0, chunks.0).flat_map(move |(iz, rz)| {
        axis(shape.1, chunks.1).flat_map(move |(iy, ry)| {
            let rz = rz.clone();
            axis(shape.2, chunks.2).map(move |(ix, rx)| ChunkCell {
                key: format!("{iz}.{iy}.{ix}"),
                ranges: [rz.clone(), ry.clone(), rx],
            })
        })
    })
}

fn encode_chunk(values: &Array3<i32>, codec: Codec) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(values.len() * std::mem::size_of::<i32>());
    for value in values.iter() {
        raw.extend_from_slice(&value.to_le_bytes());
    }

    match codec {
        Codec::Raw => Ok(raw),
        Codec::Zlib { level } => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(&raw)?;
            encoder.finish()
        }
        Codec::Gzip { level } => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(&raw)?;
            encoder.finish()
        }
    }
}

fn decode_chunk(bytes: &[u8], codec: Codec) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    match codec {
        Codec::Raw => raw.extend_from_slice(bytes),
        Codec::Zlib { .. } => {
            ZlibDecoder::new(bytes).read_to_end(&mut raw)?;
        }
        Codec::Gzip { .. } => {
            GzDecoder::new(bytes).read_to_end(&mut raw)?;
        }
    }
    Ok(raw)
}

/// Pretty-print `value` as JSON (two-space indent) to `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| PhantomError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| PhantomError::io(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PhantomError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Writes pyramid levels and root metadata into a Zarr v2 group.
pub struct ChunkedStoreWriter {
    codec: Codec,
}

impl ChunkedStoreWriter {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Create `root` as an empty group.
    pub fn create_group(&self, root: &Path) -> Result<()> {
        fs::create_dir_all(root).map_err(|e| PhantomError::io(root, e))?;
        write_json(
            &root.join(ZGROUP_FILE),
            &ZarrGroupMeta {
                zarr_format: ZARR_FORMAT,
            },
        )
    }

    /// Write `level` as the array node `root/<index>`, replacing any node
    /// already there.
    ///
    /// The chunk shape is clamped to the level's extent on every axis.
    ///
    /// # Errors
    ///
    /// [`PhantomError::EmptyVolume`] if the level has a zero-length axis,
    /// [`PhantomError::InvalidConfig`] if its chunk shape does.
    pub fn write(&self, root: &Path, level: &PyramidLevel) -> Result<()> {
        let shape = level.shape();
        if shape.0 == 0 || shape.1 == 0 || shape.2 == 0 {
            return Err(PhantomError::EmptyVolume);
        }
        let chunk_shape = clamp_chunk_shape(level.chunk_shape, shape);
        if chunk_shape.0 == 0 || chunk_shape.1 == 0 || chunk_shape.2 == 0 {
            return Err(PhantomError::InvalidConfig(format!(
                "level {} has chunk shape {:?}",
                level.index, level.chunk_shape
            )));
        }

        let node = root.join(level.path());
        if node.exists() {
            debug!("replacing existing node {}", node.display());
            fs::remove_dir_all(&node).map_err(|e| PhantomError::io(&node, e))?;
        }
        fs::create_dir_all(&node).map_err(|e| PhantomError::io(&node, e))?;

        let meta = ZarrArrayMeta::for_array(shape, chunk_shape, self.codec);
        write_json(&node.join(ZARRAY_FILE), &meta)?;

        let mut padded = Array3::from_elem(chunk_shape, FILL_VALUE);
        let mut chunk_count = 0usize;
        for cell in chunk_grid(shape, chunk_shape) {
            let [rz, ry, rx] = cell.ranges;
            let block = level.data.slice(s![rz.clone(), ry.clone(), rx.clone()]);

            let bytes = if block.dim() == chunk_shape {
                encode_chunk(&block.to_owned(), self.codec)
            } else {
                padded.fill(FILL_VALUE);
                padded
                    .slice_mut(s![..rz.len(), ..ry.len(), ..rx.len()])
                    .assign(&block);
                encode_chunk(&padded, self.codec)
            };

            let chunk_path = node.join(&cell.key);
            let bytes = bytes.map_err(|e| PhantomError::io(&chunk_path, e))?;
            fs::write(&chunk_path, bytes).map_err(|e| PhantomError::io(&chunk_path, e))?;
            chunk_count += 1;
        }

        debug!(
            "wrote level {} shape {:?} chunks {:?} ({chunk_count} chunk files)",
            level.index, shape, chunk_shape
        );
        Ok(())
    }

    /// Write the root attributes and the sidecar from the same descriptor list.
    pub fn write_metadata(&self, root: &Path, attributes: &StoreAttributes) -> Result<()> {
        write_json(&root.join(ZATTRS_FILE), attributes)?;
        write_json(&root.join(SIDECAR_FILE), &attributes.multiscales)
    }
}

/// Read access to a store produced by [`ChunkedStoreWriter`].
#[derive(Debug, Clone)]
pub struct ZarrStore {
    root: PathBuf,
}

impl ZarrStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let group: ZarrGroupMeta = read_json(&root.join(ZGROUP_FILE))?;
        if group.zarr_format != ZARR_FORMAT {
            return Err(PhantomError::CorruptStore(format!(
                "unsupported zarr_format {}",
                group.zarr_format
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attributes(&self) -> Result<StoreAttributes> {
        read_json(&self.root.join(ZATTRS_FILE))
    }

    pub fn sidecar(&self) -> Result<Vec<MultiscaleDescriptor>> {
        read_json(&self.root.join(SIDECAR_FILE))
    }

    pub fn array_meta(&self, index: usize) -> Result<ZarrArrayMeta> {
        read_json(&self.root.join(index.to_string()).join(ZARRAY_FILE))
    }

    /// Reassemble the array node of level `index`. Missing chunks read as
    /// the fill value.
    pub fn read_level(&self, index: usize) -> Result<Array3<i32>> {
        let meta = self.array_meta(index)?;
        if meta.dtype != LABEL_DTYPE || meta.order != "C" {
            return Err(PhantomError::CorruptStore(format!(
                "level {index}: expected C-ordered {LABEL_DTYPE}, got {} {}",
                meta.order, meta.dtype
            )));
        }
        let codec = meta.codec()?;
        let (shape, chunks) = meta.dims()?;
        let chunk_len = chunks.0 * chunks.1 * chunks.2;

        let node = self.root.join(index.to_string());
        let mut out = Array3::from_elem(shape, meta.fill_value);
        for cell in chunk_grid(shape, chunks) {
            let chunk_path = node.join(&cell.key);
            if !chunk_path.exists() {
                continue;
            }
            let bytes = fs::read(&chunk_path).map_err(|e| PhantomError::io(&chunk_path, e))?;
            let raw = decode_chunk(&bytes, codec).map_err(|e| PhantomError::io(&chunk_path, e))?;
            if raw.len() != chunk_len * std::mem::size_of::<i32>() {
                return Err(PhantomError::CorruptStore(format!(
                    "chunk {} holds {} bytes, expected {}",
                    chunk_path.display(),
                    raw.len(),
                    chunk_len * std::mem::size_of::<i32>()
                )));
            }

            let values: Vec<i32> = raw
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            let chunk = Array3::from_shape_vec(chunks, values)
                .map_err(|e| PhantomError::CorruptStore(e.to_string()))?;

            let [rz, ry, rx] = cell.ranges;
            out.slice_mut(s![rz.clone(), ry.clone(), rx.clone()])
                .assign(&chunk.slice(s![..rz.len(), ..ry.len(), ..rx.len()]));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn level(index: usize, shape: Shape3, chunk_shape: Shape3) -> PyramidLevel {
        PyramidLevel {
            index,
            data: Array3::from_shape_fn(shape, |(z, y, x)| (z * 100 + y * 10 + x) as i32 % 7),
            chunk_shape,
        }
    }

    #[test]
    fn test_chunk_grid_covers_edges() {
        let keys: Vec<String> = chunk_grid((5, 2, 3), (2, 2, 2)).map(|cell| cell.key).collect();
        assert_eq!(keys, vec!["0.0.0", "0.0.1", "1.0.0", "1.0.1", "2.0.0", "2.0.1"]);

        let last = chunk_grid((5, 2, 3), (2, 2, 2)).last().unwrap();
        assert_eq!(last.ranges, [4..5, 0..2, 2..3]);
    }

    #[test]
    fn test_zarray_document() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedStoreWriter::new(Codec::Raw);
        writer.create_group(dir.path()).unwrap();
        writer.write(dir.path(), &level(1, (4, 6, 8), (4, 4, 4))).unwrap();

        let value: serde_json::Value = read_json(&dir.path().join("1").join(ZARRAY_FILE)).unwrap();
        assert_eq!(value["shape"], serde_json::json!([4, 6, 8]));
        assert_eq!(value["chunks"], serde_json::json!([4, 4, 4]));
        assert_eq!(value["dtype"], "<i4");
        assert_eq!(value["order"], "C");
        assert_eq!(value["zarr_format"], 2);
        assert!(value["compressor"].is_null());

        let group: serde_json::Value = read_json(&dir.path().join(ZGROUP_FILE)).unwrap();
        assert_eq!(group, serde_json::json!({"zarr_format": 2}));
    }

    #[test]
    fn test_edge_chunks_are_padded() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedStoreWriter::new(Codec::Raw);
        writer.create_group(dir.path()).unwrap();
        writer.write(dir.path(), &level(0, (3, 3, 3), (2, 2, 2))).unwrap();

        let node = dir.path().join("0");
        for key in ["0.0.0", "0.1.1", "1.1.1"] {
            let bytes = fs::read(node.join(key)).unwrap();
            assert_eq!(bytes.len(), 2 * 2 * 2 * 4, "chunk {key}");
        }
        assert!(!node.join("2.0.0").exists());
    }

    #[test]
    fn test_codecs_read_back_exactly() {
        for codec in [Codec::Raw, Codec::Zlib { level: 6 }, Codec::Gzip { level: 1 }] {
            let dir = TempDir::new().unwrap();
            let writer = ChunkedStoreWriter::new(codec);
            writer.create_group(dir.path()).unwrap();
            let written = level(0, (7, 5, 9), (4, 4, 4));
            writer.write(dir.path(), &written).unwrap();

            let store = ZarrStore::open(dir.path()).unwrap();
            assert_eq!(store.array_meta(0).unwrap().codec().unwrap(), codec);
            assert_eq!(store.read_level(0).unwrap(), written.data, "{codec:?}");
        }
    }

    #[test]
    fn test_rewrite_replaces_node() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedStoreWriter::new(Codec::Raw);
        writer.create_group(dir.path()).unwrap();
        writer.write(dir.path(), &level(0, (4, 4, 4), (2, 2, 2))).unwrap();
        writer.write(dir.path(), &level(0, (2, 2, 2), (2, 2, 2))).unwrap();

        let node = dir.path().join("0");
        assert!(node.join("0.0.0").exists());
        assert!(!node.join("1.1.1").exists());
        assert_eq!(ZarrStore::open(dir.path()).unwrap().read_level(0).unwrap().dim(), (2, 2, 2));
    }

    #[test]
    fn test_oversized_chunk_is_clamped() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedStoreWriter::new(Codec::Raw);
        writer.create_group(dir.path()).unwrap();
        let written = level(0, (3, 5, 2), (64, 4, 128));
        writer.write(dir.path(), &written).unwrap();

        let store = ZarrStore::open(dir.path()).unwrap();
        let meta = store.array_meta(0).unwrap();
        assert_eq!(meta.chunks, vec![3, 4, 2]);
        assert_eq!(meta.shape, vec![3, 5, 2]);
        assert_eq!(store.read_level(0).unwrap(), written.data);
    }

    #[test]
    fn test_zero_extent_level_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedStoreWriter::new(Codec::Raw);
        writer.create_group(dir.path()).unwrap();

        let empty = level(0, (0, 0, 0), (0, 0, 0));
        assert!(matches!(writer.write(dir.path(), &empty), Err(PhantomError::EmptyVolume)));
        let flat = level(1, (4, 0, 4), (2, 2, 2));
        assert!(matches!(writer.write(dir.path(), &flat), Err(PhantomError::EmptyVolume)));
        let no_chunk = level(2, (4, 4, 4), (2, 0, 2));
        assert!(matches!(
            writer.write(dir.path(), &no_chunk),
            Err(PhantomError::InvalidConfig(_))
        ));

        for index in ["0", "1", "2"] {
            assert!(!dir.path().join(index).exists());
        }
    }

    #[test]
    fn test_open_rejects_missing_group() {
        let dir = TempDir::new().unwrap();
        assert!(ZarrStore::open(dir.path()).is_err());
    }
}
