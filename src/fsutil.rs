use std::path::Path;

use crate::error::CoreError;

/// Write `contents` to `path` via a temporary sibling file followed by an atomic rename,
/// setting the given Unix permission bits on the temp file before the rename.
///
/// Used by both the file-backed credential source and the file-backed state store so a
/// reader never observes a partially written `.json`/`.state.json` file.
pub async fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<(), CoreError> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    tokio::fs::write(&tmp_path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Best-effort removal; absence of the file is not an error.
pub async fn remove_if_exists(path: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
