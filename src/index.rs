//! Exact nearest-neighbour index over chunk embeddings.
//!
//! [`IndexStore`] owns the flat vector table, the id → metadata side table
//! and the id counter. Both halves are persisted next to each other: the
//! vectors as a bincode artifact and the metadata as JSON. The two files
//! carry the same generation stamp so a reader never accepts a mixed pair.

use crate::error::{RagError, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

pub type VectorId = u64;

const FORMAT_VERSION: u32 = 1;

pub const INDEX_FILE_NAME: &str = "vectors.idx";
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Side information stored for every vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub path: String,
    pub chunk_id: usize,
    pub text_preview: String,
}

/// Location of the persisted artifact pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl IndexPaths {
    /// Default file names inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        IndexPaths {
            index_path: dir.join(INDEX_FILE_NAME),
            metadata_path: dir.join(METADATA_FILE_NAME),
        }
    }
}

/// Flat vector table searched by brute force
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    ids: Vec<VectorId>,
    /// Row-major, `ids.len() * dim` values
    data: Vec<f32>,
    known: HashSet<VectorId>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        FlatIndex {
            dim,
            ids: Vec::new(),
            data: Vec::new(),
            known: HashSet::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add one vector under a caller-assigned id
    pub fn insert(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if !self.known.insert(id) {
            return Err(RagError::DuplicateId(id));
        }
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Up to `k` `(id, distance)` pairs by ascending squared Euclidean distance.
    ///
    /// Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>> {
        if query.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(VectorId, f32)> = self
            .ids
            .iter()
            .zip(self.data.chunks_exact(self.dim))
            .map(|(&id, row)| (id, squared_l2(query, row)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Squared Euclidean distance between two equally sized vectors
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Vector index plus its metadata table and id counter
#[derive(Debug, Clone)]
pub struct IndexStore {
    index: FlatIndex,
    metadata: BTreeMap<VectorId, ChunkMetadata>,
    next_id: VectorId,
    model: String,
    generation: u64,
}

impl IndexStore {
    /// Empty store for vectors of `dim` produced by `model`
    pub fn new(dim: usize, model: &str) -> Self {
        IndexStore {
            index: FlatIndex::new(dim),
            metadata: BTreeMap::new(),
            next_id: 0,
            model: model.to_string(),
            generation: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.index.dim()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Id the next [`IndexStore::add`] will use
    pub fn next_id(&self) -> VectorId {
        self.next_id
    }

    pub fn metadata(&self, id: VectorId) -> Option<&ChunkMetadata> {
        self.metadata.get(&id)
    }

    /// Generation stamp of the last persist or load, 0 if never persisted
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store a vector under the next id from the counter
    pub fn add(&mut self, vector: &[f32], metadata: ChunkMetadata) -> Result<VectorId> {
        let id = self.next_id;
        self.insert(id, vector, metadata)?;
        Ok(id)
    }

    /// Store a vector and its metadata under an explicit id.
    ///
    /// Nothing is written unless both halves can be stored.
    pub fn insert(
        &mut self,
        id: VectorId,
        vector: &[f32],
        metadata: ChunkMetadata,
    ) -> Result<()> {
        if self.metadata.contains_key(&id) {
            return Err(RagError::DuplicateId(id));
        }
        self.index.insert(id, vector)?;
        self.metadata.insert(id, metadata);
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }

    /// Nearest neighbours as raw `(id, distance)` pairs
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>> {
        self.index.search(query, k)
    }

    /// Write both artifacts, replacing any previous pair.
    ///
    /// Each file is written to a temporary sibling, synced and renamed into
    /// place only after both temporaries are complete.
    pub fn persist(&mut self, paths: &IndexPaths) -> Result<()> {
        let generation = new_generation(self.generation);

        let vectors = VectorArtifact {
            version: FORMAT_VERSION,
            dim: self.index.dim,
            model: self.model.clone(),
            generation,
            ids: self.index.ids.clone(),
            data: self.index.data.clone(),
        };
        let vector_bytes = bincode::serialize(&vectors).map_err(|e| RagError::Persistence {
            path: paths.index_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        let metadata = MetadataArtifact {
            version: FORMAT_VERSION,
            generation,
            model: self.model.clone(),
            records: self.metadata.clone(),
        };
        let metadata_bytes =
            serde_json::to_vec_pretty(&metadata).map_err(|e| RagError::Persistence {
                path: paths.metadata_path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;

        let index_tmp = write_temp(&paths.index_path, &vector_bytes)?;
        let metadata_tmp = write_temp(&paths.metadata_path, &metadata_bytes)?;

        // A crash between the two renames leaves mismatched generations,
        // which `load` rejects instead of serving a mixed pair.
        commit_temp(index_tmp, &paths.index_path)?;
        commit_temp(metadata_tmp, &paths.metadata_path)?;

        self.generation = generation;
        info!(
            "Saved {} vectors to {} and metadata to {}",
            self.len(),
            paths.index_path.display(),
            paths.metadata_path.display()
        );
        Ok(())
    }

    /// Load a previously persisted pair
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        for path in [&paths.index_path, &paths.metadata_path] {
            if !path.exists() {
                return Err(RagError::MissingIndex(path.clone()));
            }
        }

        let vector_bytes = read_artifact(&paths.index_path)?;
        let vectors: VectorArtifact = bincode::deserialize(&vector_bytes).map_err(|e| {
            RagError::CorruptIndex(format!(
                "cannot decode {}: {}",
                paths.index_path.display(),
                e
            ))
        })?;

        let metadata_bytes = read_artifact(&paths.metadata_path)?;
        let metadata: MetadataArtifact = serde_json::from_slice(&metadata_bytes).map_err(|e| {
            RagError::CorruptIndex(format!(
                "cannot decode {}: {}",
                paths.metadata_path.display(),
                e
            ))
        })?;

        let store = Self::from_artifacts(vectors, metadata)?;
        info!(
            "Loaded {} vectors (dim {}, generation {})",
            store.len(),
            store.dim(),
            store.generation
        );
        Ok(store)
    }

    fn from_artifacts(vectors: VectorArtifact, metadata: MetadataArtifact) -> Result<Self> {
        if vectors.version != FORMAT_VERSION || metadata.version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported format version {}/{} (expected {})",
                vectors.version, metadata.version, FORMAT_VERSION
            )));
        }
        if vectors.generation != metadata.generation {
            return Err(RagError::CorruptIndex(format!(
                "index generation {} does not match metadata generation {}",
                vectors.generation, metadata.generation
            )));
        }
        if vectors.model != metadata.model {
            warn!(
                "Vector artifact model '{}' differs from metadata model '{}'",
                vectors.model, metadata.model
            );
        }
        if vectors.dim == 0 || vectors.data.len() != vectors.ids.len() * vectors.dim {
            return Err(RagError::CorruptIndex(format!(
                "{} values cannot hold {} vectors of dimension {}",
                vectors.data.len(),
                vectors.ids.len(),
                vectors.dim
            )));
        }
        if vectors.ids.len() != metadata.records.len()
            || vectors
                .ids
                .iter()
                .any(|id| !metadata.records.contains_key(id))
        {
            return Err(RagError::CorruptIndex(
                "vector ids and metadata ids differ".to_string(),
            ));
        }

        let mut index = FlatIndex::new(vectors.dim);
        for (id, row) in vectors.ids.iter().zip(vectors.data.chunks_exact(vectors.dim)) {
            index.insert(*id, row)?;
        }
        let next_id = vectors.ids.iter().max().map_or(0, |max| max + 1);
        debug!("Next vector id after load: {}", next_id);

        Ok(IndexStore {
            index,
            metadata: metadata.records,
            next_id,
            model: vectors.model,
            generation: vectors.generation,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct VectorArtifact {
    version: u32,
    dim: usize,
    model: String,
    generation: u64,
    ids: Vec<VectorId>,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct MetadataArtifact {
    version: u32,
    generation: u64,
    model: String,
    records: BTreeMap<VectorId, ChunkMetadata>,
}

/// Wall-clock stamp, forced to move forward from `previous`
fn new_generation(previous: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    now.max(previous + 1)
}

fn write_temp(target: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let to_err = |source: io::Error| RagError::Persistence {
        path: target.to_path_buf(),
        source,
    };

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(to_err)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(to_err)?;
    tmp.write_all(bytes).map_err(to_err)?;
    tmp.as_file().sync_all().map_err(to_err)?;
    Ok(tmp)
}

fn commit_temp(tmp: NamedTempFile, target: &Path) -> Result<()> {
    tmp.persist(target)
        .map_err(|e| RagError::Persistence {
            path: target.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RagError::MissingIndex(path.to_path_buf()),
        _ => RagError::CorruptIndex(format!("cannot read {}: {}", path.display(), e)),
    })
}
