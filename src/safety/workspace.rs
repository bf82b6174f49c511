/// Run directory management
/// Each test executes inside a freshly materialised directory; whatever the
/// previous test left there is destroyed first.
use crate::config::types::{HarnessError, Result};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// How the fixture directory is brought into the run directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayMode {
    /// One symlink per top-level fixture entry
    Symlink,
    /// Full recursive copy; the candidate cannot mutate the shared fixture
    Copy,
}

impl OverlayMode {
    pub fn from_static_copy(static_copy: bool) -> Self {
        if static_copy {
            OverlayMode::Copy
        } else {
            OverlayMode::Symlink
        }
    }
}

/// A materialised run directory
#[derive(Clone, Debug)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Build `dst` from `fixture` (which may not exist) using `mode`
    pub fn build(fixture: &Path, mode: OverlayMode, dst: &Path) -> Result<Self> {
        match fs::remove_dir_all(dst) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::Io(io::Error::new(
                    e.kind(),
                    format!("Failed to remove previous run directory {}: {}", dst.display(), e),
                )))
            }
        }

        if fixture.exists() {
            match mode {
                OverlayMode::Symlink => overlay_symlinks(fixture, dst)?,
                OverlayMode::Copy => copy_tree(fixture, dst)?,
            }
        } else {
            fs::create_dir_all(dst)?;
        }

        let path = absolute(dst)?;
        log::debug!("Run directory ready at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// `target` expressed relative to this directory (`../solution` style)
    pub fn relative(&self, target: &Path) -> Result<String> {
        relative_path(&self.path, &absolute(target)?)
    }
}

fn overlay_symlinks(fixture: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    let fixture = absolute(fixture)?;
    for entry in fs::read_dir(&fixture)? {
        let entry = entry?;
        symlink(entry.path(), dst.join(entry.file_name()))?;
    }
    Ok(())
}

fn copy_tree(fixture: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(fixture).follow_links(true) {
        let entry = entry.map_err(|e| {
            HarnessError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to walk {}: {}", fixture.display(), e),
            ))
        })?;
        let rel = entry
            .path()
            .strip_prefix(fixture)
            .map_err(|e| HarnessError::Internal(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Make `path` absolute against the current directory without resolving symlinks
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize(&joined))
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Express absolute `path` relative to absolute directory `base`, climbing
/// with `../` until a common ancestor is found
pub fn relative_path(base: &Path, path: &Path) -> Result<String> {
    let mut ancestor = base;
    let mut parents = 0usize;
    loop {
        if let Ok(rest) = path.strip_prefix(ancestor) {
            let rest = rest.to_str().ok_or_else(|| {
                HarnessError::Config(format!("{} is not valid UTF-8", path.display()))
            })?;
            return Ok(format!("{}{}", "../".repeat(parents), rest));
        }
        ancestor = ancestor.parent().ok_or_else(|| {
            HarnessError::Internal(format!(
                "{} and {} share no common ancestor",
                base.display(),
                path.display()
            ))
        })?;
        parents += 1;
    }
}
