//! Database schema versioning
//!
//! Every RocksDB store carries a version stamp so that older layouts can be
//! upgraded in place and newer ones are refused instead of misread.

use rocksdb::{IteratorMode, DB};

use crate::error::{MemoryError, Result};

/// Database version stored in metadata
pub(crate) const DB_VERSION_KEY: &[u8] = b"_db_version";

/// Layout version written by this build
pub const CURRENT_VERSION: u32 = 1;

/// Read the stamped version, if any
pub(crate) fn read_version(db: &DB) -> Result<Option<u32>> {
    match db.get(DB_VERSION_KEY)? {
        Some(bytes) => {
            let bytes_slice: &[u8] = bytes.as_ref();
            let version_bytes: [u8; 4] = bytes_slice
                .try_into()
                .map_err(|_| MemoryError::schema("invalid version format"))?;
            Ok(Some(u32::from_le_bytes(version_bytes)))
        }
        None => Ok(None),
    }
}

/// Stamp a fresh database or upgrade an older one
pub(crate) fn migrate_if_needed(db: &DB) -> Result<()> {
    let version = match read_version(db)? {
        Some(version) => version,
        None if is_empty(db) => {
            log::debug!("Fresh database, stamping schema v{}", CURRENT_VERSION);
            return stamp(db);
        }
        None => {
            return Err(MemoryError::schema(
                "database has records but no version stamp",
            ))
        }
    };

    if version > CURRENT_VERSION {
        return Err(MemoryError::schema(format!(
            "database schema v{} is newer than supported v{}",
            version, CURRENT_VERSION
        )));
    }

    if version < CURRENT_VERSION {
        log::warn!(
            "Database needs migration from v{} to v{}",
            version,
            CURRENT_VERSION
        );
        for from in version..CURRENT_VERSION {
            perform_migration(db, from)?;
        }
        stamp(db)?;
        log::info!("Migration completed successfully");
    }

    Ok(())
}

/// Upgrade one step, from `from_version` to `from_version + 1`
fn perform_migration(_db: &DB, from_version: u32) -> Result<()> {
    Err(MemoryError::schema(format!(
        "no migration path from database version {}",
        from_version
    )))
}

fn stamp(db: &DB) -> Result<()> {
    db.put(DB_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
    db.flush()?;
    Ok(())
}

fn is_empty(db: &DB) -> bool {
    db.iterator(IteratorMode::Start).next().is_none()
}
