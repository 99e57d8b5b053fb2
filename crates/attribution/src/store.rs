//! SQLite-backed key-value store for per-example attribution records.
//!
//! Record `n` occupies four keys:
//!
//! | key              | value                                      |
//! |------------------|--------------------------------------------|
//! | `<n>_x`          | JSON `{ "shape", "dtype", "values" }`      |
//! | `<n>_metadata`   | JSON list of token names                   |
//! | `<n>_attr_shape` | JSON list of dimensions                    |
//! | `<n>_attrs`      | little-endian `f32` bytes                  |
//!
//! Input values are written as `f64` and cast back to their recorded dtype on
//! read; records without a dtype read back as `f64`.
//!
//! `length` holds the record count once a writing pass has finished. Readers
//! fall back to `key_count / 4` when it is missing.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, Result};

const LENGTH_KEY: &str = "length";

fn default_stored_dtype() -> String {
    DType::F64.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredTensor {
    shape: Vec<usize>,
    #[serde(default = "default_stored_dtype")]
    dtype: String,
    values: Vec<f64>,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionRecord {
    pub metadata: Vec<String>,
    /// `(layers, heads, q, k)`.
    pub shape: Vec<usize>,
    pub attrs: Vec<f32>,
}

#[derive(Debug)]
pub struct AttributionStore {
    conn: Connection,
    next: usize,
}

impl AttributionStore {
    /// Creates a fresh store at `path`, discarding any previous contents.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "DROP TABLE IF EXISTS kv;
             CREATE TABLE kv (key TEXT PRIMARY KEY, value BLOB NOT NULL);",
        )?;
        log::debug!("created attribution store at {}", path.as_ref().display());
        Ok(Self { conn, next: 0 })
    }

    /// Opens an existing store for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut store = Self { conn, next: 0 };
        store.next = store.len()?;
        Ok(store)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    fn require(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)?
            .ok_or_else(|| AttributionError::MissingKey(key.to_string()))
    }

    fn require_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<T> {
        Ok(serde_json::from_slice(&self.require(key)?)?)
    }

    pub fn key_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of records, from `length` or estimated from the key count.
    pub fn len(&self) -> Result<usize> {
        match self.get(LENGTH_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(self.key_count()? / 4),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Writes one record and returns its index.
    ///
    /// `attrs` is stored as `f32` regardless of its dtype.
    pub fn append(&mut self, input: &Tensor, metadata: &[String], attrs: &Tensor) -> Result<usize> {
        let index = self.next;
        let x = StoredTensor {
            shape: input.dims().to_vec(),
            dtype: input.dtype().as_str().to_string(),
            values: input.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?,
        };
        let values = attrs.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            insert.execute(params![format!("{index}_x"), serde_json::to_vec(&x)?])?;
            insert.execute(params![format!("{index}_metadata"), serde_json::to_vec(metadata)?])?;
            insert.execute(params![
                format!("{index}_attr_shape"),
                serde_json::to_vec(attrs.dims())?
            ])?;
            insert.execute(params![format!("{index}_attrs"), bytes])?;
        }
        tx.commit()?;
        self.next += 1;
        Ok(index)
    }

    /// Writes the `length` key and closes the store.
    pub fn finish(self) -> Result<usize> {
        self.put(LENGTH_KEY, &serde_json::to_vec(&self.next)?)?;
        log::info!("attribution store closed with {} records", self.next);
        Ok(self.next)
    }

    pub fn record(&self, index: usize) -> Result<AttributionRecord> {
        let metadata: Vec<String> = self.require_json(&format!("{index}_metadata"))?;
        let shape: Vec<usize> = self.require_json(&format!("{index}_attr_shape"))?;
        let bytes = self.require(&format!("{index}_attrs"))?;
        if bytes.len() % 4 != 0 {
            return Err(AttributionError::Shape(format!(
                "record {index}: {} attribution bytes are not a whole number of f32 values",
                bytes.len()
            )));
        }
        let attrs = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        let expected = shape.iter().product::<usize>();
        if attrs.len() != expected {
            return Err(AttributionError::Shape(format!(
                "record {index}: shape {shape:?} needs {expected} values, found {}",
                attrs.len()
            )));
        }
        Ok(AttributionRecord {
            metadata,
            shape,
            attrs,
        })
    }

    /// The stored model input of record `index`, in the dtype it was written with.
    pub fn input(&self, index: usize, device: &Device) -> Result<Tensor> {
        let x: StoredTensor = self.require_json(&format!("{index}_x"))?;
        let dtype = x.dtype.parse::<DType>().map_err(|_| {
            AttributionError::Shape(format!("record {index}: unknown input dtype '{}'", x.dtype))
        })?;
        Ok(Tensor::from_vec(x.values, x.shape, device)?.to_dtype(dtype)?)
    }
}
