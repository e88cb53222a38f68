//! Renders daemon configuration into unique scratch directories.
//!
//! Each bundle lives in its own directory under the configured root:
//!
//! ```text
//! drydock-<name>-XXXXXX/
//!   config/      base document and `<role>.d/` overlays
//!   logs/        captured stdout/stderr and daemon log files
//!   run/         pid files
//!   pki/         key material
//! ```
//!
//! Only the `config/` subtree is tracked file-by-file; the whole directory is
//! removed by [`ConfigMaterializer::cleanup`].

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config_map::{ConfigFormat, ConfigMap};
use crate::errors::ConfigRenderError;
use crate::role::{LinkedDaemon, Role, RoleDefaults};

const MATERIALIZE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::materialize");

/// One file written into a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the contents.
    pub sha256: String,
}

/// Inputs for rendering one daemon's configuration.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Logical daemon name.
    pub name: &'a str,
    /// Identifier written into the configuration.
    pub id: &'a str,
    /// Daemon role.
    pub role: Role,
    /// Listening port.
    pub port: u16,
    /// Caller overrides, merged over role defaults.
    pub overrides: &'a ConfigMap,
    /// Dependencies the daemon links to.
    pub links: &'a [LinkedDaemon],
    /// Discovered SFTP subsystem binary.
    pub sftp_server: Option<&'a Path>,
}

/// Rendered configuration for one daemon.
#[derive(Debug)]
pub struct ConfigBundle {
    role: Role,
    root: PathBuf,
    config_dir: PathBuf,
    base_file: PathBuf,
    config: ConfigMap,
    files: Mutex<Vec<RenderedFile>>,
}

impl ConfigBundle {
    /// Role the bundle was rendered for.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Scratch directory owned by the daemon; removed on cleanup.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the rendered documents.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of the base document.
    #[must_use]
    pub fn base_file(&self) -> &Path {
        &self.base_file
    }

    /// Directory receiving captured output and daemon logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Merged configuration written to the base document.
    #[must_use]
    pub const fn config(&self) -> &ConfigMap {
        &self.config
    }

    /// Files written so far, in write order.
    #[must_use]
    pub fn files(&self) -> Vec<RenderedFile> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn track(&self, file: RenderedFile) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.retain(|existing| existing.path != file.path);
        files.push(file);
    }
}

/// Writes configuration bundles beneath a shared root directory.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    root: PathBuf,
    retain: bool,
}

impl ConfigMaterializer {
    /// Creates a materializer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            root: root.into(),
            retain,
        }
    }

    /// Shared parent of every bundle.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether bundles survive teardown for debugging.
    #[must_use]
    pub const fn retains(&self) -> bool {
        self.retain
    }

    /// Merges role defaults with overrides and writes the base document into
    /// a freshly created unique directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigRenderError`] when the directory cannot be created, the
    /// merged map cannot be expressed in the role's format, or a write fails.
    /// A partially created directory is removed before returning.
    pub fn render(&self, request: &RenderRequest<'_>) -> Result<ConfigBundle, ConfigRenderError> {
        fs::create_dir_all(&self.root).map_err(|source| ConfigRenderError::CreateDir {
            root: self.root.clone(),
            source,
        })?;
        let root = tempfile::Builder::new()
            .prefix(&format!("drydock-{}-", sanitise(request.name)))
            .keep(true)
            .tempdir_in(&self.root)
            .map_err(|source| ConfigRenderError::CreateDir {
                root: self.root.clone(),
                source,
            })?
            .path()
            .to_path_buf();
        match populate(&root, request) {
            Ok(bundle) => {
                info!(
                    target: MATERIALIZE_TARGET,
                    name = request.name,
                    role = %request.role,
                    dir = %bundle.config_dir.display(),
                    keys = bundle.config.len(),
                    "config rendered"
                );
                Ok(bundle)
            }
            Err(error) => {
                remove_tree(&root)?;
                Err(error)
            }
        }
    }

    /// Writes a drop-in document into the role's overlay directory. Overlay
    /// files override the base document when the daemon loads its config.
    ///
    /// # Errors
    ///
    /// Fails for roles without an overlay directory, for invalid names, and
    /// for write failures.
    pub fn write_overlay(
        &self,
        bundle: &ConfigBundle,
        file_name: &str,
        map: &ConfigMap,
    ) -> Result<PathBuf, ConfigRenderError> {
        let overlay = bundle
            .role
            .overlay_dir()
            .ok_or(ConfigRenderError::NoOverlayDir { role: bundle.role })?;
        let contents = map.render(ConfigFormat::Mapping)?;
        self.write_file(bundle, &format!("{overlay}/{file_name}"), &contents)
    }

    /// Writes an arbitrary file relative to the bundle's config directory.
    ///
    /// # Errors
    ///
    /// Rejects absolute names and names containing `..`; reports write
    /// failures.
    pub fn write_file(
        &self,
        bundle: &ConfigBundle,
        relative: &str,
        contents: &str,
    ) -> Result<PathBuf, ConfigRenderError> {
        let relative_path = Path::new(relative);
        let valid = !relative.is_empty()
            && relative_path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(ConfigRenderError::InvalidFileName {
                name: relative.to_owned(),
            });
        }
        let path = bundle.config_dir.join(relative_path);
        let file = write_tracked(&path, contents)?;
        bundle.track(file);
        debug!(target: MATERIALIZE_TARGET, file = %path.display(), "config file written");
        Ok(path)
    }

    /// Removes the bundle directory. Missing files are tolerated, so calling
    /// this twice is safe.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigRenderError::Remove`] when removal fails for a reason
    /// other than the directory already being gone.
    pub fn cleanup(&self, bundle: &ConfigBundle) -> Result<(), ConfigRenderError> {
        remove_tree(&bundle.root)?;
        debug!(target: MATERIALIZE_TARGET, dir = %bundle.root.display(), "config removed");
        Ok(())
    }
}

fn populate(root: &Path, request: &RenderRequest<'_>) -> Result<ConfigBundle, ConfigRenderError> {
    let config_dir = root.join("config");
    for dir in [&config_dir, &root.join("logs"), &root.join("run"), &root.join("pki")] {
        create_dir(dir)?;
    }
    let defaults = RoleDefaults {
        id: request.id,
        port: request.port,
        root,
        sftp_server: request.sftp_server,
        links: request.links,
    };
    let config = request
        .role
        .default_config(&defaults)
        .merged_with(request.overrides);
    let contents = config.render(request.role.format())?;
    let base_file = config_dir.join(request.role.base_file());
    let rendered = write_tracked(&base_file, &contents)?;
    Ok(ConfigBundle {
        role: request.role,
        root: root.to_path_buf(),
        config_dir,
        base_file,
        config,
        files: Mutex::new(vec![rendered]),
    })
}

fn create_dir(path: &Path) -> Result<(), ConfigRenderError> {
    fs::create_dir_all(path).map_err(|source| ConfigRenderError::CreateDir {
        root: path.to_path_buf(),
        source,
    })
}

fn write_tracked(path: &Path, contents: &str) -> Result<RenderedFile, ConfigRenderError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).map_err(|source| ConfigRenderError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(RenderedFile {
        path: path.to_path_buf(),
        sha256: format!("{:x}", Sha256::digest(contents.as_bytes())),
    })
}

fn remove_tree(path: &Path) -> Result<(), ConfigRenderError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ConfigRenderError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn sanitise(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
