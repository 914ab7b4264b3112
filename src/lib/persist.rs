//! Reading and atomically replacing the local env file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::error::SyncError;
use crate::parse::EnvFile;

const TEMP_PREFIX: &str = ".env.tmp.";

/// Reads the env file, returning `None` when it does not exist.
pub fn read_env_file(path: &Path) -> Result<Option<String>, SyncError> {
  match fs::read_to_string(path) {
    Ok(text) => Ok(Some(text)),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(err) => Err(SyncError::io(path, err)),
  }
}

/// Replaces the file at `path` with the formatted `env`.
///
/// The content goes to a temporary file in the same directory, created
/// owner-only (0600 on Unix), which is synced and then renamed over `path`.
/// The destination is never observed half-written; on any failure the
/// temporary file is removed and the original is left untouched.
pub fn write_env_file(path: &Path, env: &EnvFile<'_>) -> Result<(), SyncError> {
  write_atomic(path, env.to_string().as_bytes(), |file, content| {
    file.write_all(content)
  })
}

pub(crate) fn write_atomic<F>(path: &Path, content: &[u8], fill: F) -> Result<(), SyncError>
where
  F: FnOnce(&mut NamedTempFile, &[u8]) -> io::Result<()>,
{
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };

  let mut builder = tempfile::Builder::new();
  builder.prefix(TEMP_PREFIX);
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    builder.permissions(fs::Permissions::from_mode(0o600));
  }

  let mut temp = builder
    .tempfile_in(dir)
    .map_err(|err| SyncError::io(dir, err))?;

  #[cfg(feature = "tracing")]
  debug!(temp = ?temp.path(), "Writing {} bytes to temporary file", content.len());

  fill(&mut temp, content).map_err(|err| SyncError::io(temp.path(), err))?;
  temp
    .as_file()
    .sync_all()
    .map_err(|err| SyncError::io(temp.path(), err))?;

  temp
    .persist(path)
    .map_err(|err| SyncError::io(path, err.error))?;

  #[cfg(feature = "tracing")]
  debug!(?path, "Replaced env file");

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse::parse;
  use tempfile::TempDir;

  #[test]
  fn test_read_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(read_env_file(&dir.path().join(".env")).unwrap().is_none());
  }

  #[test]
  fn test_write_creates_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".env");
    let env = parse("# header\nA=1\n").unwrap();

    write_env_file(&path, &env).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "# header\nA=1\n");
  }

  #[cfg(unix)]
  #[test]
  fn test_written_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".env");
    fs::write(&path, "OLD=1\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    write_env_file(&path, &parse("NEW=1\n").unwrap()).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
  }

  #[test]
  fn test_failed_write_leaves_original_intact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".env");
    let original = "# keep me\nA=1\nB=2\n";
    fs::write(&path, original).unwrap();

    let result = write_atomic(&path, b"A=changed\nB=changed\n", |file, content| {
      file.write_all(&content[..5])?;
      Err(io::Error::other("disk full"))
    });

    assert!(matches!(result, Err(SyncError::Io { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);

    let leftovers: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
      .collect();
    assert!(leftovers.is_empty());
  }
}
