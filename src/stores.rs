//! The relational, vector and graph stores, opened together.
//!
//! The relational database is the source of truth. The vector and graph
//! databases sit next to it (`{stem}.vectors.db`, `{stem}.graph.db`) and can
//! be rebuilt from it at any time.

use std::path::{Path, PathBuf};

use crate::config::derived_store_paths;
use crate::error::{Error, Result};
use crate::graph::SqliteGraphStore;
use crate::storage::SqliteStorage;
use crate::vector::SqliteVectorStore;

/// `embeddings_meta` key holding the configured dimensionality.
pub const DIMENSIONS_META_KEY: &str = "dimensions";

/// File locations of the three stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub relational: PathBuf,
    pub vectors: PathBuf,
    pub graph: PathBuf,
}

impl StorePaths {
    /// Derive the vector and graph paths from the relational database path.
    #[must_use]
    pub fn for_database(db_path: &Path) -> Self {
        let (vectors, graph) = derived_store_paths(db_path);
        Self {
            relational: db_path.to_path_buf(),
            vectors,
            graph,
        }
    }

    /// Open all three stores with fresh connections.
    ///
    /// Each worker calls this for its own connections.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if either store was created with a
    /// different dimensionality, or any open error.
    pub fn open(&self, dimensions: usize) -> Result<Stores> {
        let mut stores = Stores {
            relational: SqliteStorage::open(&self.relational)?,
            vectors: SqliteVectorStore::open(&self.vectors, dimensions)?,
            graph: SqliteGraphStore::open(&self.graph)?,
        };
        stores.check_dimensions(dimensions)?;
        Ok(stores)
    }

    /// Dimensionality the relational store was last indexed with.
    ///
    /// Reindexing opens the stores at this value, since the configured one
    /// may already be the new target.
    ///
    /// # Errors
    ///
    /// Returns an error if the relational store cannot be opened.
    pub fn recorded_dimensions(&self) -> Result<Option<usize>> {
        let storage = SqliteStorage::open(&self.relational)?;
        Ok(storage
            .get_embedding_meta(DIMENSIONS_META_KEY)?
            .and_then(|v| v.parse::<usize>().ok()))
    }
}

/// One connection to each store.
#[derive(Debug)]
pub struct Stores {
    pub relational: SqliteStorage,
    pub vectors: SqliteVectorStore,
    pub graph: SqliteGraphStore,
}

impl Stores {
    /// In-memory stores (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if any in-memory database cannot be created.
    pub fn open_memory(dimensions: usize) -> Result<Self> {
        let mut stores = Self {
            relational: SqliteStorage::open_memory()?,
            vectors: SqliteVectorStore::open_memory(dimensions)?,
            graph: SqliteGraphStore::open_memory()?,
        };
        stores.check_dimensions(dimensions)?;
        Ok(stores)
    }

    /// Record the dimensionality in `embeddings_meta`, or refuse a mismatch.
    fn check_dimensions(&mut self, dimensions: usize) -> Result<()> {
        match self.relational.get_embedding_meta(DIMENSIONS_META_KEY)? {
            Some(stored) if stored.parse::<usize>().ok() == Some(dimensions) => Ok(()),
            Some(stored) => Err(Error::Config(format!(
                "database was indexed with {stored} dimensions but {dimensions} are configured; \
                 run `kh ingest reindex --dimensions {dimensions}`"
            ))),
            None => self
                .relational
                .set_embedding_meta(DIMENSIONS_META_KEY, &dimensions.to_string()),
        }
    }
}
