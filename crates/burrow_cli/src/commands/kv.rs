//! Single-key commands: `get`, `set`, `delete` and `ttl`.

use crate::error::CliResult;
use burrow_core::{now_millis, ttl_from_millis, Database};
use std::time::Duration;

/// Reads the current value of `key`.
pub fn get(db: &Database, key: &str) -> CliResult<Vec<u8>> {
    Ok(db.get(key.as_bytes())?)
}

/// Writes `value` under `key`. A TTL of zero or less means no expiry.
pub fn set(db: &Database, key: &str, value: &str, ttl_ms: Option<i64>) -> CliResult<()> {
    let ttl = ttl_ms.and_then(ttl_from_millis);
    db.set(key.as_bytes(), value.as_bytes().to_vec(), ttl)?;
    Ok(())
}

/// Deletes `key`. Deleting an absent key succeeds.
pub fn delete(db: &Database, key: &str) -> CliResult<()> {
    db.delete(key.as_bytes())?;
    Ok(())
}

/// Time left before `key` expires, or `None` if it never does.
pub fn ttl(db: &Database, key: &str) -> CliResult<Option<Duration>> {
    let expires_at = db.expires_at(key.as_bytes())?;
    if expires_at == 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_millis(
        expires_at.saturating_sub(now_millis()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::with_database;
    use crate::error::CliError;
    use burrow_core::CoreError;

    #[test]
    fn set_get_delete_across_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        with_database(&path, true, |db| set(db, "greeting", "hello", None)).unwrap();
        let value = with_database(&path, false, |db| get(db, "greeting")).unwrap();
        assert_eq!(value, b"hello");

        with_database(&path, false, |db| delete(db, "greeting")).unwrap();
        let missing = with_database(&path, false, |db| get(db, "greeting"));
        assert!(matches!(missing, Err(CliError::Core(CoreError::KeyNotFound))));
    }

    #[test]
    fn ttl_reports_remaining_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        with_database(&path, true, |db| {
            set(db, "forever", "x", None)?;
            set(db, "soon", "x", Some(60_000))?;
            set(db, "negative", "x", Some(-5))
        })
        .unwrap();

        with_database(&path, false, |db| {
            assert_eq!(ttl(db, "forever")?, None);
            assert_eq!(ttl(db, "negative")?, None);
            let left = ttl(db, "soon")?.unwrap();
            assert!(left > Duration::from_secs(50));
            assert!(left <= Duration::from_secs(60));
            Ok(())
        })
        .unwrap();
    }
}
