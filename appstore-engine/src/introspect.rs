//! # Package Introspection
//!
//! Derives a [`BasicInfo`] from an extracted package archive: identity from
//! the `.mf` manifest, the top-level `.md` documentation, a mirror of the
//! directory tree, and the descriptor format. Symbolic links anywhere in the
//! tree reject the package.

use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::{extract_bounded, scoped_dir, ExtractionLimits, ExtractionViolation};
use crate::error::{AppError, AppResult};
use crate::models::BasicInfo;
use crate::types::{DeployMode, PackageFormat};

pub const KEY_NAME: &str = "app_product_name";
pub const KEY_PROVIDER: &str = "app_provider_id";
pub const KEY_VERSION: &str = "app_package_version";
pub const KEY_CONTACT: &str = "app_contact";
pub const KEY_CLASS: &str = "app_class";

const REQUIRED_KEYS: [&str; 4] = [KEY_NAME, KEY_PROVIDER, KEY_VERSION, KEY_CONTACT];

/// Manifests are small key/value files; anything past this is ignored.
const MANIFEST_MAX_BYTES: u64 = 64 * 1024;

/// Bounds applied while walking an extracted package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrospectLimits {
    pub max_entries: usize,
    /// Documentation beyond this many bytes is truncated.
    pub max_doc_bytes: u64,
    /// A documentation line longer than this fails the package.
    pub max_line_length: usize,
}

impl Default for IntrospectLimits {
    fn default() -> Self {
        Self {
            max_entries: crate::archive::DEFAULT_MAX_ENTRIES,
            max_doc_bytes: 1024 * 1024,
            max_line_length: 4096,
        }
    }
}

/// Node of the mirrored directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
}

impl FileNode {
    fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Dir,
            children: Vec::new(),
        }
    }

    fn insert(&mut self, segments: &[String], is_dir: bool) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let position = self.children.iter().position(|c| c.name == *head);
        let index = match position {
            Some(index) => index,
            None => {
                let kind = if rest.is_empty() && !is_dir {
                    NodeKind::File
                } else {
                    NodeKind::Dir
                };
                self.children.push(FileNode {
                    name: head.clone(),
                    kind,
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        self.children[index].insert(rest, is_dir);
    }
}

/// Key/value pairs read from manifest lines; the first occurrence of a key wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    values: HashMap<String, String>,
}

impl Manifest {
    /// Parse `key: value` lines. Blank and malformed lines, including lines
    /// that are not valid UTF-8, are skipped; keys are matched
    /// case-insensitively and values are trimmed.
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        let mut manifest = Self::default();
        manifest.absorb(
            bytes
                .split(|b| *b == b'\n')
                .filter_map(|line| std::str::from_utf8(line).ok()),
        );
        manifest
    }

    fn absorb<'a>(&mut self, lines: impl Iterator<Item = &'a str>) {
        for line in lines {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            self.values.entry(key).or_insert_with(|| value.to_string());
        }
    }

    /// Keys already present keep their value.
    fn merge(&mut self, other: Manifest) {
        for (key, value) in other.values {
            self.values.entry(key).or_insert(value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn missing_required(&self) -> Vec<String> {
        REQUIRED_KEYS
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| key.to_string())
            .collect()
    }
}

/// Read up to `max_bytes` of documentation, truncating at a char boundary.
///
/// Any line longer than `max_line_length` fails the package.
pub fn read_documentation(
    path: &Path,
    max_bytes: u64,
    max_line_length: usize,
) -> AppResult<String> {
    let mut buf = Vec::new();
    File::open(path)?.take(max_bytes).read_to_end(&mut buf)?;

    let text = match String::from_utf8(buf) {
        Ok(text) => text,
        Err(e) => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };

    if let Some((number, line)) = text
        .lines()
        .enumerate()
        .find(|(_, line)| line.chars().count() > max_line_length)
    {
        return Err(AppError::InvalidPackage {
            reason: format!(
                "documentation line {} is {} characters long (limit {max_line_length})",
                number + 1,
                line.chars().count()
            ),
        });
    }

    Ok(text)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

fn segments(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn is_tosca_descriptor(segments: &[String]) -> bool {
    match segments {
        [dir, file] if dir.eq_ignore_ascii_case("TOSCA-Metadata") => {
            file.eq_ignore_ascii_case("TOSCA.meta")
        }
        [dir, .., file] if dir.eq_ignore_ascii_case("Definitions") => {
            let lower = file.to_ascii_lowercase();
            lower.ends_with(".yaml") || lower.ends_with(".yml")
        }
        _ => false,
    }
}

/// Walk an extracted package rooted at `root` and derive its [`BasicInfo`].
pub fn introspect(root: &Path, limits: &IntrospectLimits) -> AppResult<BasicInfo> {
    let mut tree = FileNode::dir("");
    let mut manifest = Manifest::default();
    let mut manifest_seen = false;
    let mut documentation: Option<String> = None;
    let mut format = PackageFormat::Legacy;
    let mut entries = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| AppError::InvalidPackage {
            reason: format!("unreadable package tree: {e}"),
        })?;

        entries += 1;
        if entries > limits.max_entries {
            return Err(AppError::ExtractionRejected {
                archive: root.display().to_string(),
                violation: ExtractionViolation::TooManyEntries {
                    limit: limits.max_entries,
                },
            });
        }

        let relative = entry.path().strip_prefix(root).map_err(|_| {
            AppError::InternalError(format!("{} escaped package root", entry.path().display()))
        })?;
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            return Err(AppError::InvalidPackage {
                reason: format!("symbolic link in package: {}", relative.display()),
            });
        }

        let parts = segments(relative);
        tree.insert(&parts, file_type.is_dir());
        if !file_type.is_file() {
            continue;
        }

        if is_tosca_descriptor(&parts) {
            format = PackageFormat::Tosca;
        }

        if has_extension(entry.path(), "mf") {
            manifest_seen = true;
            let mut raw = Vec::new();
            File::open(entry.path())?
                .take(MANIFEST_MAX_BYTES)
                .read_to_end(&mut raw)?;
            manifest.merge(Manifest::parse_bytes(&raw));
            debug!(manifest = %relative.display(), "Manifest read");
        } else if entry.depth() == 1 && documentation.is_none() && has_extension(entry.path(), "md")
        {
            documentation = Some(read_documentation(
                entry.path(),
                limits.max_doc_bytes,
                limits.max_line_length,
            )?);
        }
    }

    if !manifest_seen {
        return Err(AppError::InvalidPackage {
            reason: "no .mf manifest found".to_string(),
        });
    }

    let missing = manifest.missing_required();
    if !missing.is_empty() {
        return Err(AppError::MissingManifestFields { fields: missing });
    }

    let field = |key: &str| manifest.get(key).unwrap_or_default().to_string();
    let info = BasicInfo {
        app_name: field(KEY_NAME),
        provider: field(KEY_PROVIDER),
        version: field(KEY_VERSION),
        contact: field(KEY_CONTACT),
        file_type: format,
        file_structure: serde_json::to_string(&tree.children)?,
        markdown: documentation.unwrap_or_default(),
        deploy_mode: manifest
            .get(KEY_CLASS)
            .map(DeployMode::from_manifest_value)
            .unwrap_or_default(),
    };

    info!(
        app_name = %info.app_name,
        provider = %info.provider,
        version = %info.version,
        format = ?info.file_type,
        entries = entries,
        "Package introspected"
    );
    Ok(info)
}

/// Extract `archive` into a scratch directory under `scratch_root` and
/// introspect it. The scratch directory is gone when this returns.
pub fn inspect_archive(
    archive: &Path,
    scratch_root: &Path,
    extraction: &ExtractionLimits,
    limits: &IntrospectLimits,
) -> AppResult<BasicInfo> {
    let scratch = scoped_dir(scratch_root, "extract-")?;
    let dest = scratch.path().join("content");
    extract_bounded(archive, &dest, extraction)?;
    introspect(&dest, limits)
}
