//! Directory-backed migration discovery.
//!
//! Accepted file names:
//! - `<version>_<name>.up.sql`
//! - `<version>_<name>.sql`
//!
//! `<version>_<name>.down.sql` files are ignored, as is anything that does
//! not end in `.sql`.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::{Migration, MigrationError, MigrationSet};

/// Read every migration file in `dir` and return them as an ordered set.
///
/// # Errors
/// - [`MigrationError::Source`] if the directory or a file cannot be read.
/// - [`MigrationError::InvalidSet`] for malformed `.sql` file names, empty
///   bodies, bodies with their own `BEGIN`/`COMMIT`, or duplicate versions.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<MigrationSet, MigrationError> {
    let dir = dir.as_ref();
    let source_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| MigrationError::Source { path, source }
    };

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir).map_err(source_err(dir))? {
        let entry = entry.map_err(source_err(dir))?;
        let path = entry.path();
        if !entry.file_type().map_err(source_err(&path))?.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            debug!("skipping non-UTF-8 file name {}", path.display());
            continue;
        };

        let Some((version, name)) = parse_file_name(file_name)? else {
            debug!("skipping {file_name}");
            continue;
        };

        let body = fs::read_to_string(&path).map_err(source_err(&path))?;
        if body.trim().is_empty() {
            return Err(MigrationError::InvalidSet(format!("{file_name} has an empty body")));
        }

        migrations.push(Migration::new(version, name, body));
    }

    migrations.sort_by_key(|m| m.version);
    let set = MigrationSet::new(migrations)?;
    info!("loaded {} migrations from {}", set.len(), dir.display());
    Ok(set)
}

/// Split a migration file name into version and name.
///
/// Returns `Ok(None)` for files that are not up-migrations.
fn parse_file_name(file_name: &str) -> Result<Option<(i64, String)>, MigrationError> {
    if file_name.ends_with(".down.sql") {
        return Ok(None);
    }
    let Some(stem) = file_name
        .strip_suffix(".up.sql")
        .or_else(|| file_name.strip_suffix(".sql"))
    else {
        return Ok(None);
    };

    let malformed = || {
        MigrationError::InvalidSet(format!(
            "{file_name} does not match <version>_<name>.up.sql or <version>_<name>.sql"
        ))
    };

    let (digits, name) = stem.split_once('_').ok_or_else(malformed)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return Err(malformed());
    }
    let version = digits.parse::<i64>().map_err(|_| malformed())?;

    Ok(Some((version, name.to_owned())))
}
