//! SqliteVecIndex: disk-backed KNN over category embeddings via sqlite-vec
//!
//! Vectors are L2-normalized on insert so that L2 distance from vec0
//! can be converted to cosine similarity: `sim = 1 - dist² / 2`.
//!
//! Uses its own database file so the index never contends with the
//! `SqliteStore` connection while the similarity stage runs.

#[cfg(feature = "vector-index")]
mod inner {
    use crate::dedup::similarity::{l2_normalize, VectorIndex};
    use crate::graph::NodeId;
    use crate::storage::{StorageError, StorageResult};
    use rusqlite::{params, Connection};
    use sqlite_vec::sqlite3_vec_init;
    use std::path::Path;
    use std::sync::{Mutex, MutexGuard};

    /// Persistent KNN index backed by a vec0 virtual table.
    pub struct SqliteVecIndex {
        conn: Mutex<Connection>,
        dimensions: usize,
    }

    /// Register the sqlite-vec extension globally (safe under parallel test execution).
    fn register_vec_extension() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        });
    }

    impl SqliteVecIndex {
        /// Open (or create) an index file for vectors of the given width.
        ///
        /// The table is recreated when the stored width differs, since a
        /// vec0 column has a fixed dimension.
        pub fn open(path: &Path, dimensions: usize) -> StorageResult<Self> {
            register_vec_extension();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(path)?;
            Self::init_connection(conn, dimensions)
        }

        pub fn open_in_memory(dimensions: usize) -> StorageResult<Self> {
            register_vec_extension();
            let conn = Connection::open_in_memory()?;
            Self::init_connection(conn, dimensions)
        }

        fn init_connection(conn: Connection, dimensions: usize) -> StorageResult<Self> {
            if dimensions == 0 {
                return Err(StorageError::InvalidData(
                    "vector index needs a non-zero dimension".into(),
                ));
            }
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS vec_meta (dimensions INTEGER NOT NULL);",
            )?;

            let stored: Option<i64> = conn
                .query_row("SELECT dimensions FROM vec_meta LIMIT 1", [], |row| row.get(0))
                .ok();
            if stored != Some(dimensions as i64) {
                conn.execute_batch(
                    "DROP TABLE IF EXISTS vec_categories; DELETE FROM vec_meta;",
                )?;
                conn.execute(
                    "INSERT INTO vec_meta (dimensions) VALUES (?1)",
                    params![dimensions as i64],
                )?;
            }

            let create_sql = format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_categories USING vec0(\
                     node_id TEXT,\
                     embedding float[{}]\
                 )",
                dimensions
            );
            conn.execute_batch(&create_sql)?;

            Ok(Self {
                conn: Mutex::new(conn),
                dimensions,
            })
        }

        pub fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
            self.conn.lock().map_err(|_| StorageError::Poisoned)
        }

        fn check_width(&self, vector: &[f32]) -> StorageResult<()> {
            if vector.len() != self.dimensions {
                return Err(StorageError::InvalidData(format!(
                    "expected {}-dimensional vector, got {}",
                    self.dimensions,
                    vector.len()
                )));
            }
            Ok(())
        }
    }

    /// Reinterpret a `&[f32]` slice as raw bytes for sqlite-vec blob parameters.
    fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
        // f32 has no padding and a fixed layout
        unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
    }

    impl VectorIndex for SqliteVecIndex {
        fn insert(&self, id: &NodeId, embedding: &[f32]) -> StorageResult<()> {
            self.check_width(embedding)?;
            let mut normalized = embedding.to_vec();
            l2_normalize(&mut normalized);
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO vec_categories(node_id, embedding) VALUES (?1, ?2)",
                params![id.as_str(), f32_slice_as_bytes(&normalized)],
            )?;
            Ok(())
        }

        fn knn(&self, query: &[f32], k: usize) -> StorageResult<Vec<(NodeId, f32)>> {
            self.check_width(query)?;
            let mut normalized = query.to_vec();
            l2_normalize(&mut normalized);
            let conn = self.conn()?;

            // For unit vectors: L2_dist² = 2(1 - cos_sim), so cos_sim = 1 - dist²/2.
            let mut stmt = conn.prepare(
                "SELECT node_id, distance \
                 FROM vec_categories \
                 WHERE embedding MATCH ?1 \
                   AND k = ?2 \
                 ORDER BY distance",
            )?;
            let rows = stmt
                .query_map(params![f32_slice_as_bytes(&normalized), k as i64], |row| {
                    let id: String = row.get(0)?;
                    let distance: f64 = row.get(1)?;
                    Ok((NodeId::from_string(id), (1.0 - distance * distance / 2.0) as f32))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        }

        fn clear(&self) -> StorageResult<()> {
            let conn = self.conn()?;
            conn.execute("DELETE FROM vec_categories", [])?;
            Ok(())
        }
    }

}

#[cfg(feature = "vector-index")]
pub use inner::SqliteVecIndex;
