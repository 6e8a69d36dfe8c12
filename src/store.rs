//! The vector store module
//! Loads the embedding matrix and its positionally aligned chunk texts
//!
//! On disk a store is a directory with three files:
//!
//! ```text
//! embeddings.npy   N x D float matrix (NumPy .npy, row-major)
//! chunks.json      JSON array of N strings, chunks[i] belongs to row i
//! manifest.json    optional: embedding policy + dimension used at build time
//! ```
//!
//! The store is read once at startup and never mutated afterwards.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{CHUNKS_FILE, EMBEDDINGS_FILE, MANIFEST_FILE};
use crate::embed::EmbeddingPolicy;
use crate::error::StoreError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Build-time record of how the stored embeddings were produced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    #[serde(flatten)]
    pub policy: EmbeddingPolicy,
    pub dimension: usize,
}

/// Immutable N x D embedding matrix plus N chunk texts.
#[derive(Debug)]
pub struct VectorStore {
    vectors: Vec<f32>,
    dimension: usize,
    chunks: Vec<String>,
    manifest: Option<Manifest>,
}

impl VectorStore {
    /// Builds a store from a flat row-major matrix and its chunks.
    ///
    /// # Errors
    ///
    /// * `StoreError::Format` if `dimension` is zero or `vectors` is not a
    ///   whole number of rows, or if any value is NaN or infinite
    /// * `StoreError::ShapeMismatch` if the chunk count differs from the row count
    pub fn new(vectors: Vec<f32>, dimension: usize, chunks: Vec<String>) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::Format("embedding dimension must be greater than zero".to_string()));
        }
        if vectors.len() % dimension != 0 {
            return Err(StoreError::Format(format!(
                "{} values do not form rows of dimension {}",
                vectors.len(),
                dimension
            )));
        }

        let rows = vectors.len() / dimension;
        if chunks.len() != rows {
            return Err(StoreError::ShapeMismatch { chunks: chunks.len(), rows });
        }

        if let Some(position) = vectors.iter().position(|v| !v.is_finite()) {
            return Err(StoreError::Format(format!(
                "non-finite value {} at row {}, column {}",
                vectors[position],
                position / dimension,
                position % dimension
            )));
        }

        Ok(VectorStore { vectors, dimension, chunks, manifest: None })
    }

    /// Parses a serialized `.npy` matrix and a JSON chunk list.
    ///
    /// # Examples
    ///
    /// ```
    /// use semsearch::store::{encode_npy, VectorStore};
    ///
    /// let matrix = encode_npy(2, 2, &[1.0, 0.0, 0.0, 1.0]);
    /// let store = VectorStore::from_bytes(&matrix, br#"["a", "b"]"#).unwrap();
    /// assert_eq!(store.rows(), 2);
    /// assert_eq!(store.dimension(), 2);
    /// assert_eq!(store.chunk(1), "b");
    /// ```
    pub fn from_bytes(matrix: &[u8], chunks: &[u8]) -> Result<Self, StoreError> {
        let matrix = decode_npy(matrix)?;
        let chunks = decode_chunks(chunks)?;
        VectorStore::new(matrix.data, matrix.cols, chunks)
    }

    /// Loads `embeddings.npy`, `chunks.json` and, if present,
    /// `manifest.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let matrix_bytes = read_file(&dir.join(EMBEDDINGS_FILE))?;
        let chunk_bytes = read_file(&dir.join(CHUNKS_FILE))?;

        let mut store = VectorStore::from_bytes(&matrix_bytes, &chunk_bytes)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let manifest: Manifest = serde_json::from_slice(&read_file(&manifest_path)?)
                .map_err(|e| StoreError::Format(format!("invalid manifest '{}': {}", manifest_path.display(), e)))?;
            store.manifest = Some(manifest);
        }

        tracing::info!(
            rows = store.rows(),
            dim = store.dimension(),
            manifest = store.manifest.is_some(),
            "Loaded embeddings from {}",
            dir.display()
        );

        Ok(store)
    }

    /// Writes the store into `dir` together with a manifest for `policy`.
    ///
    /// Used for offline store construction; a serving process never calls it.
    pub fn write(&self, dir: &Path, policy: &EmbeddingPolicy) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let matrix_path = dir.join(EMBEDDINGS_FILE);
        let file = File::create(&matrix_path).map_err(|e| io_error(&matrix_path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&encode_npy(self.rows(), self.dimension, &self.vectors))
            .and_then(|_| writer.flush())
            .map_err(|e| io_error(&matrix_path, e))?;

        let chunks_path = dir.join(CHUNKS_FILE);
        let chunks_json = serde_json::to_vec(&self.chunks)
            .map_err(|e| StoreError::Format(format!("cannot serialize chunks: {}", e)))?;
        fs::write(&chunks_path, chunks_json).map_err(|e| io_error(&chunks_path, e))?;

        let manifest = Manifest { policy: policy.clone(), dimension: self.dimension };
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StoreError::Format(format!("cannot serialize manifest: {}", e)))?;
        fs::write(&manifest_path, manifest_json).map_err(|e| io_error(&manifest_path, e))?;

        Ok(())
    }

    /// Number of rows (and chunks).
    pub fn rows(&self) -> usize {
        self.chunks.len()
    }

    /// Embedding dimension D.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns row `index` of the matrix.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.rows()`.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Iterates over all rows in index order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.chunks_exact(self.dimension)
    }

    /// Returns the chunk text aligned with row `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.rows()`.
    pub fn chunk(&self, index: usize) -> &str {
        &self.chunks[index]
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.display().to_string(), source }
}

/// Parses the chunk sidecar: a flat JSON array of strings.
pub fn decode_chunks(bytes: &[u8]) -> Result<Vec<String>, StoreError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Format(format!("chunk list is not a JSON array of strings: {}", e)))
}

// --- NPY codec ---

/// A decoded two-dimensional `.npy` array.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dtype {
    F4 { little: bool },
    F8 { little: bool },
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, StoreError> {
        let little = match descr.as_bytes().first() {
            Some(b'<') | Some(b'|') => true,
            Some(b'>') => false,
            Some(b'=') => cfg!(target_endian = "little"),
            _ => return Err(StoreError::Format(format!("unsupported dtype '{}'", descr))),
        };

        match &descr[1..] {
            "f4" => Ok(Dtype::F4 { little }),
            "f8" => Ok(Dtype::F8 { little }),
            _ => Err(StoreError::Format(format!(
                "unsupported dtype '{}', expected a float32 or float64 matrix",
                descr
            ))),
        }
    }

    fn item_size(self) -> usize {
        match self {
            Dtype::F4 { .. } => 4,
            Dtype::F8 { .. } => 8,
        }
    }

    fn decode(self, payload: &[u8]) -> Vec<f32> {
        match self {
            Dtype::F4 { little } => payload
                .chunks_exact(4)
                .map(|b| {
                    let b = [b[0], b[1], b[2], b[3]];
                    if little { f32::from_le_bytes(b) } else { f32::from_be_bytes(b) }
                })
                .collect(),
            Dtype::F8 { little } => payload
                .chunks_exact(8)
                .map(|b| {
                    let b = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
                    let v = if little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) };
                    v as f32
                })
                .collect(),
        }
    }
}

/// Decodes a NumPy `.npy` file (format versions 1.0 to 3.0) holding a
/// C-ordered two-dimensional float matrix.
pub fn decode_npy(bytes: &[u8]) -> Result<NpyMatrix, StoreError> {
    if bytes.len() < 10 || &bytes[0..6] != NPY_MAGIC {
        return Err(StoreError::Format("missing .npy magic bytes".to_string()));
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(StoreError::Format("truncated .npy header".to_string()));
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(StoreError::Format(format!("unsupported .npy version {}", v))),
    };

    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(StoreError::Format("truncated .npy header".to_string()));
    }
    let header = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|_| StoreError::Format(".npy header is not valid text".to_string()))?;

    let dtype = Dtype::parse(header_string(header, "descr")?)?;

    if header_literal(header, "fortran_order")? != "False" {
        return Err(StoreError::Format("Fortran-ordered matrices are not supported".to_string()));
    }

    let shape = header_shape(header)?;
    let (rows, cols) = match shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(StoreError::Format(format!(
                "expected a 2D matrix, got shape {:?}",
                other
            )))
        }
    };

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(dtype.item_size()))
        .ok_or_else(|| StoreError::Format(format!("shape ({}, {}) is too large", rows, cols)))?;
    let payload = &bytes[header_end..];
    if payload.len() != expected {
        return Err(StoreError::Format(format!(
            "payload is {} bytes, shape ({}, {}) needs {}",
            payload.len(),
            rows,
            cols,
            expected
        )));
    }

    Ok(NpyMatrix { rows, cols, data: dtype.decode(payload) })
}

/// Encodes a row-major `f32` matrix as a little-endian `.npy` v1.0 file.
pub fn encode_npy(rows: usize, cols: usize, data: &[f32]) -> Vec<u8> {
    debug_assert_eq!(rows * cols, data.len());

    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, cols
    );
    // magic(6) + version(2) + len(2) + header + '\n' is padded to the alignment
    let unpadded = 10 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + data.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Returns the raw text following `'key':` in a header dict, up to the end
/// of the header.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str, StoreError> {
    let needle_single = format!("'{}'", key);
    let needle_double = format!("\"{}\"", key);
    let pos = header
        .find(&needle_single)
        .map(|p| p + needle_single.len())
        .or_else(|| header.find(&needle_double).map(|p| p + needle_double.len()))
        .ok_or_else(|| StoreError::Format(format!(".npy header has no '{}' entry", key)))?;

    let rest = header[pos..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| StoreError::Format(format!("malformed '{}' entry in .npy header", key)))?;
    Ok(rest.trim_start())
}

fn header_string<'a>(header: &'a str, key: &str) -> Result<&'a str, StoreError> {
    let value = header_value(header, key)?;
    let quote = value
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| StoreError::Format(format!("'{}' is not a string in .npy header", key)))?;
    let body = &value[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| StoreError::Format(format!("unterminated '{}' in .npy header", key)))?;
    Ok(&body[..end])
}

fn header_literal<'a>(header: &'a str, key: &str) -> Result<&'a str, StoreError> {
    let value = header_value(header, key)?;
    let end = value
        .find(|c: char| c == ',' || c == '}')
        .unwrap_or(value.len());
    Ok(value[..end].trim())
}

fn header_shape(header: &str) -> Result<Vec<usize>, StoreError> {
    let value = header_value(header, "shape")?;
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.find(')').map(|end| &v[..end]))
        .ok_or_else(|| StoreError::Format("'shape' is not a tuple in .npy header".to_string()))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| StoreError::Format(format!("invalid dimension '{}' in .npy shape", s)))
        })
        .collect()
}
