use std::path::PathBuf;
use std::{fmt, io, path::Path, sync::Arc};

use rocksdb::{Options, Transaction, TransactionDB, TransactionDBOptions};
use tracing::info;

pub use migration_db::{MigrationRocksDb, MigrationStore};

/// Migration rows and the store interface the orchestrator works against
mod migration_db;

/// Result type of store operations
pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Clone)]
/// A transactional KV store
pub struct DB(Arc<TransactionDB>);

impl fmt::Debug for DB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DB").finish_non_exhaustive()
    }
}

impl From<TransactionDB> for DB {
    fn from(rocks: TransactionDB) -> Self {
        Self(Arc::new(rocks))
    }
}

/// DB Error type
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// Rocks DB Error
    #[error("{0}")]
    RockError(#[from] rocksdb::Error),
    #[error("Failed to open {path}, canonicalized as {canonicalized}: {source}")]
    /// Error opening the database
    OpeningError {
        /// Rocksdb error during opening
        #[source]
        source: rocksdb::Error,
        /// Raw database path provided
        path: PathBuf,
        /// Parsed path used
        canonicalized: PathBuf,
    },
    /// Could not parse the provided database path string
    #[error("Invalid database path supplied {1:?}; {0}")]
    InvalidDbPath(#[source] io::Error, String),
    /// A stored value could not be (de)serialized
    #[error("Failed to encode or decode a stored value: {0}")]
    Codec(#[from] serde_json::Error),
    /// Custom error
    #[error("{0}")]
    Other(String),
}

impl DB {
    /// Opens db at `db_path` and creates if missing
    #[tracing::instrument(err)]
    pub fn from_path(db_path: &Path) -> DbResult<DB> {
        let path = {
            let mut path = db_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .canonicalize()
                .map_err(|e| DbError::InvalidDbPath(e, db_path.to_string_lossy().into()))?;
            if let Some(file_name) = db_path.file_name() {
                path.push(file_name);
            }
            path
        };

        if path.is_dir() {
            info!(path=%path.to_string_lossy(), "Opening existing db")
        } else {
            info!(path=%path.to_string_lossy(), "Creating db")
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        TransactionDB::open(&opts, &TransactionDBOptions::default(), &path)
            .map_err(|e| DbError::OpeningError {
                source: e,
                path: db_path.into(),
                canonicalized: path,
            })
            .map(Into::into)
    }

    /// Store a value in the DB
    pub fn store(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        Ok(self.0.put(key, value)?)
    }

    /// Retrieve a value from the DB
    pub fn retrieve(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }

    /// Remove a value from the DB
    pub fn delete(&self, key: &[u8]) -> DbResult<()> {
        Ok(self.0.delete(key)?)
    }

    /// All key-value pairs whose key starts with `prefix`, in key order
    pub fn prefix_entries(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.0.prefix_iterator(prefix) {
            let (key, value) = item?;
            // no prefix extractor is configured, so the iterator runs past the prefix
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }

    /// Run `f` inside a pessimistic transaction and commit it if `f` succeeds.
    /// Keys read with `get_for_update` stay locked until the commit. On error the
    /// transaction is rolled back.
    pub fn transactional<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Transaction<TransactionDB>) -> DbResult<T>,
    {
        let txn = self.0.transaction();
        let value = f(&txn)?;
        txn.commit()?;
        Ok(value)
    }
}
