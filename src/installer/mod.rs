use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use crate::errors::QueueError;
use crate::models::InstallMode;
use crate::spawner::steam;

const DISABLED_SUFFIX: &str = ".disabled";

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    /// Directory the tool downloads under (its working directory).
    pub content_root: PathBuf,
    pub app_id: String,
    pub content_item_id: String,
    pub destination: PathBuf,
    pub mode: InstallMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub installed_path: PathBuf,
    pub source_path: PathBuf,
}

/// Places downloaded content where the game expects it.
#[async_trait]
pub trait ContentInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> Result<InstallOutcome>;
    /// Delete an installed item. Missing paths are not an error.
    async fn remove(&self, installed_path: &Path) -> Result<()>;
    /// Returns the path the item now lives at.
    async fn disable(&self, installed_path: &Path) -> Result<PathBuf>;
    /// Returns the path the item now lives at.
    async fn enable(&self, installed_path: &Path) -> Result<PathBuf>;
}

pub struct FsInstaller;

#[async_trait]
impl ContentInstaller for FsInstaller {
    async fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || install_blocking(&request))
            .await
            .context("Install task panicked")?
    }

    async fn remove(&self, installed_path: &Path) -> Result<()> {
        let path = installed_path.to_path_buf();
        tokio::task::spawn_blocking(move || remove_existing(&path))
            .await
            .context("Remove task panicked")?
    }

    async fn disable(&self, installed_path: &Path) -> Result<PathBuf> {
        let path = installed_path.to_path_buf();
        tokio::task::spawn_blocking(move || disable_blocking(&path))
            .await
            .context("Disable task panicked")?
    }

    async fn enable(&self, installed_path: &Path) -> Result<PathBuf> {
        let path = installed_path.to_path_buf();
        tokio::task::spawn_blocking(move || enable_blocking(&path))
            .await
            .context("Enable task panicked")?
    }
}

fn install_blocking(request: &InstallRequest) -> Result<InstallOutcome> {
    if request.app_id.trim().is_empty() || request.content_item_id.trim().is_empty() {
        return Err(QueueError::Validation("app id and item id are required".to_string()).into());
    }
    if request.destination.as_os_str().is_empty() {
        return Err(QueueError::Validation("install destination is required".to_string()).into());
    }

    let source = steam::download_dir(
        &request.content_root,
        &request.app_id,
        &request.content_item_id,
    );
    if !source.is_dir() {
        anyhow::bail!("Workshop download not found at {}", source.display());
    }

    std::fs::create_dir_all(&request.destination).with_context(|| {
        format!(
            "Failed to create install destination {}",
            request.destination.display()
        )
    })?;

    let target = request.destination.join(&request.content_item_id);
    remove_existing(&target)?;

    match request.mode {
        InstallMode::Copy => copy_tree(&source, &target)?,
        InstallMode::Symlink => link_dir(&source, &target)?,
    }

    tracing::info!(
        "Installed item {} ({}) to {}",
        request.content_item_id,
        request.mode,
        target.display()
    );

    Ok(InstallOutcome {
        installed_path: target,
        source_path: source,
    })
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .context("Walked outside of source directory")?;
        let dest = target.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy to {}", dest.display()))?;
        }
    }
    Ok(())
}

fn link_dir(source: &Path, target: &Path) -> Result<()> {
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(source, target);
    #[cfg(windows)]
    let result = std::os::windows::fs::symlink_dir(source, target);

    result.with_context(|| {
        format!(
            "Failed to link {} to {}",
            target.display(),
            source.display()
        )
    })
}

/// Remove whatever sits at `path`: a link, a file or a directory tree.
fn remove_existing(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect {}", path.display()))
        }
    };

    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        // Files and symlinks, including links to directories.
        std::fs::remove_file(path).or_else(|e| {
            if cfg!(windows) && meta.file_type().is_symlink() {
                std::fs::remove_dir(path)
            } else {
                Err(e)
            }
        })
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

fn path_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn disabled_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(DISABLED_SUFFIX);
    PathBuf::from(name)
}

fn enabled_path_for(path: &Path) -> Option<PathBuf> {
    let text = path.to_str()?;
    text.strip_suffix(DISABLED_SUFFIX).map(PathBuf::from)
}

fn disable_blocking(path: &Path) -> Result<PathBuf> {
    if enabled_path_for(path).is_some() {
        return Ok(path.to_path_buf());
    }
    let disabled = disabled_path_for(path);
    if !path_exists(path) {
        if path_exists(&disabled) {
            return Ok(disabled);
        }
        anyhow::bail!("Installed item not found at {}", path.display());
    }
    std::fs::rename(path, &disabled)
        .with_context(|| format!("Failed to disable {}", path.display()))?;
    Ok(disabled)
}

fn enable_blocking(path: &Path) -> Result<PathBuf> {
    let (enabled, disabled) = match enabled_path_for(path) {
        Some(enabled) => (enabled, path.to_path_buf()),
        None => (path.to_path_buf(), disabled_path_for(path)),
    };
    if !path_exists(&disabled) {
        if path_exists(&enabled) {
            return Ok(enabled);
        }
        anyhow::bail!("Installed item not found at {}", enabled.display());
    }
    std::fs::rename(&disabled, &enabled)
        .with_context(|| format!("Failed to enable {}", enabled.display()))?;
    Ok(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Lay out a fake download for item 100 and return (root tmp, content root, dest).
    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().expect("tmp");
        let content_root = tmp.path().join("steamcmd");
        let source = steam::download_dir(&content_root, "294100", "100");
        std::fs::create_dir_all(source.join("maps")).expect("mkdir");
        std::fs::write(source.join("mod.info"), "name=test").expect("write");
        std::fs::write(source.join("maps").join("arena.map"), "map").expect("write");
        let dest = tmp.path().join("game").join("mods");
        (tmp, content_root, dest)
    }

    fn make_request(content_root: &Path, dest: &Path, mode: InstallMode) -> InstallRequest {
        InstallRequest {
            content_root: content_root.to_path_buf(),
            app_id: "294100".to_string(),
            content_item_id: "100".to_string(),
            destination: dest.to_path_buf(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_copy_install_copies_tree() {
        let (_tmp, root, dest) = setup();
        let outcome = FsInstaller
            .install(&make_request(&root, &dest, InstallMode::Copy))
            .await
            .expect("install");

        assert_eq!(outcome.installed_path, dest.join("100"));
        assert_eq!(
            outcome.source_path,
            steam::download_dir(&root, "294100", "100")
        );
        let copied = std::fs::read_to_string(dest.join("100").join("maps").join("arena.map"))
            .expect("read copied");
        assert_eq!(copied, "map");
        assert!(!std::fs::symlink_metadata(dest.join("100"))
            .expect("meta")
            .file_type()
            .is_symlink());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_install_links_source() {
        let (_tmp, root, dest) = setup();
        let outcome = FsInstaller
            .install(&make_request(&root, &dest, InstallMode::Symlink))
            .await
            .expect("install");

        let meta = std::fs::symlink_metadata(&outcome.installed_path).expect("meta");
        assert!(meta.file_type().is_symlink());
        assert!(outcome.installed_path.join("mod.info").exists());
    }

    #[tokio::test]
    async fn test_install_replaces_existing_target() {
        let (_tmp, root, dest) = setup();
        std::fs::create_dir_all(dest.join("100")).expect("mkdir");
        std::fs::write(dest.join("100").join("stale.txt"), "old").expect("write");

        FsInstaller
            .install(&make_request(&root, &dest, InstallMode::Copy))
            .await
            .expect("install");
        assert!(!dest.join("100").join("stale.txt").exists());
        assert!(dest.join("100").join("mod.info").exists());
    }

    #[tokio::test]
    async fn test_missing_download_is_an_error() {
        let (_tmp, root, dest) = setup();
        let mut request = make_request(&root, &dest, InstallMode::Copy);
        request.content_item_id = "999".to_string();

        let err = FsInstaller.install(&request).await.expect_err("should fail");
        assert!(err.to_string().starts_with("Workshop download not found at"));
    }

    #[tokio::test]
    async fn test_empty_item_id_is_rejected() {
        let (_tmp, root, dest) = setup();
        let mut request = make_request(&root, &dest, InstallMode::Copy);
        request.content_item_id = " ".to_string();

        let err = FsInstaller.install(&request).await.expect_err("should fail");
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_installed_and_missing() {
        let (_tmp, root, dest) = setup();
        let outcome = FsInstaller
            .install(&make_request(&root, &dest, InstallMode::Copy))
            .await
            .expect("install");

        FsInstaller
            .remove(&outcome.installed_path)
            .await
            .expect("remove");
        assert!(!outcome.installed_path.exists());
        assert!(outcome.source_path.exists(), "source must be left alone");

        FsInstaller
            .remove(&outcome.installed_path)
            .await
            .expect("remove again is a no-op");
    }

    #[tokio::test]
    async fn test_disable_and_enable_are_idempotent() {
        let (_tmp, root, dest) = setup();
        let outcome = FsInstaller
            .install(&make_request(&root, &dest, InstallMode::Copy))
            .await
            .expect("install");
        let installed = outcome.installed_path;

        let disabled = FsInstaller.disable(&installed).await.expect("disable");
        assert_eq!(disabled, dest.join("100.disabled"));
        assert!(disabled.exists());
        assert!(!installed.exists());

        assert_eq!(
            FsInstaller.disable(&installed).await.expect("disable again"),
            disabled
        );
        assert_eq!(
            FsInstaller.disable(&disabled).await.expect("disable disabled"),
            disabled
        );

        let enabled = FsInstaller.enable(&disabled).await.expect("enable");
        assert_eq!(enabled, installed);
        assert!(installed.join("mod.info").exists());
        assert_eq!(
            FsInstaller.enable(&installed).await.expect("enable again"),
            installed
        );
    }

    #[tokio::test]
    async fn test_disable_missing_item_fails() {
        let tmp = TempDir::new().expect("tmp");
        let err = FsInstaller
            .disable(&tmp.path().join("nothing"))
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("not found"));
    }
}
