//! Filesystem checks run while validating configuration.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Dir, fs::Metadata};
use color_eyre::eyre::{Context, Result, eyre};

/// Resolves a path to an ambient directory handle paired with the relative path component.
///
/// Absolute paths are opened relative to the ambient root; relative paths reuse the current
/// working directory.
pub(crate) fn ambient_dir_and_path(path: &Utf8Path) -> Result<(Dir, Utf8PathBuf)> {
    if path.has_root() {
        let stripped = path
            .strip_prefix("/")
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf);
        let dir = Dir::open_ambient_dir("/", ambient_authority())
            .context("open ambient root directory")?;
        Ok((dir, stripped))
    } else {
        let dir = Dir::open_ambient_dir(".", ambient_authority())
            .context("open ambient working directory")?;
        Ok((dir, path.to_path_buf()))
    }
}

fn metadata(path: &Utf8Path) -> Result<Metadata> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    dir.metadata(relative.as_std_path())
        .with_context(|| format!("failed to access {path}"))
}

/// Ensures `path` names an existing regular file.
pub(crate) fn require_regular_file(path: &Utf8Path) -> Result<()> {
    if metadata(path)?.is_file() {
        Ok(())
    } else {
        Err(eyre!("{path} is not a regular file"))
    }
}

/// Ensures `path` names an existing regular file with an execute bit set.
pub(crate) fn require_executable(path: &Utf8Path) -> Result<()> {
    let metadata = metadata(path)?;
    if !metadata.is_file() {
        return Err(eyre!("{path} is not a regular file"));
    }

    #[cfg(unix)]
    {
        use cap_std::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(eyre!("{path} is not executable"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir, name: &str) -> color_eyre::Result<Utf8PathBuf> {
        Utf8PathBuf::from_path_buf(dir.path().join(name))
            .map_err(|path| eyre!("non UTF-8 temp path: {}", path.display()))
    }

    #[rstest]
    fn regular_file_passes() -> color_eyre::Result<()> {
        let dir = TempDir::new()?;
        let script = utf8(&dir, "create.sql")?;
        std::fs::write(&script, "SELECT 1;\n")?;
        require_regular_file(&script)
    }

    #[rstest]
    fn directory_is_rejected() -> color_eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = utf8(&dir, "")?;
        let err = require_regular_file(&path)
            .err()
            .ok_or_else(|| eyre!("directory should be rejected"))?;
        assert!(err.to_string().contains("is not a regular file"));
        Ok(())
    }

    #[rstest]
    fn missing_file_is_rejected() -> color_eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = utf8(&dir, "absent.sql")?;
        let err = require_regular_file(&path)
            .err()
            .ok_or_else(|| eyre!("missing file should be rejected"))?;
        assert!(err.to_string().contains("failed to access"));
        Ok(())
    }

    #[cfg(unix)]
    #[rstest]
    fn non_executable_binary_is_rejected() -> color_eyre::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new()?;
        let path = utf8(&dir, "psql")?;
        std::fs::write(&path, "#!/bin/sh\n")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;
        assert!(require_executable(&path).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        require_executable(&path)
    }
}
