//! Bundle building.
//!
//! Collects Rego modules and data documents from source paths and writes
//! them as an OPA bundle: a gzipped tarball with a `.manifest` entry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::error::{BuildError, Result};

/// Name of the bundle manifest entry.
pub const MANIFEST_ENTRY: &str = ".manifest";

const DATA_DOCUMENTS: [&str; 3] = ["data.json", "data.yaml", "data.yml"];

/// Options controlling a build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Revision recorded in the bundle manifest.
    pub revision: Option<String>,
    /// Explicit roots. Derived from package names when empty.
    pub roots: Vec<String>,
    /// Patterns for paths to leave out: a component name, or `*suffix`.
    pub ignore: Vec<String>,
    /// Whether to parse every module before writing.
    pub validate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            revision: None,
            roots: Vec::new(),
            ignore: Vec::new(),
            validate: true,
        }
    }
}

/// The `.manifest` document of an OPA bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Bundle revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Path prefixes owned by the bundle.
    pub roots: Vec<String>,
}

/// What went into a built bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Archive paths of the Rego modules.
    pub modules: Vec<String>,
    /// Archive paths of the data documents.
    pub data: Vec<String>,
    /// Roots written to the manifest.
    pub roots: Vec<String>,
}

struct Module {
    source: String,
    package: String,
}

/// Builds a bundle tarball at `output` from `sources`.
///
/// Each source may be a directory (walked recursively, entries named
/// relative to it) or a single file (named by its file name). Test modules
/// (`*_test.rego`) and hidden entries are skipped.
///
/// # Errors
///
/// Returns an error if a source cannot be read, a module fails to parse,
/// no module is found, or the archive cannot be written.
///
/// # Examples
///
/// ```rust,no_run
/// use std::path::{Path, PathBuf};
/// use policy_build::{build, BuildOptions};
///
/// let summary = build(
///     Path::new("bundle.tar.gz"),
///     &[PathBuf::from("policies")],
///     &BuildOptions::default(),
/// )?;
/// println!("{} modules", summary.modules.len());
/// # Ok::<(), policy_build::BuildError>(())
/// ```
#[instrument(skip(sources, options), fields(output = %output.display()))]
pub fn build(output: &Path, sources: &[PathBuf], options: &BuildOptions) -> Result<BuildSummary> {
    let mut modules: BTreeMap<String, Module> = BTreeMap::new();
    let mut data: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for source in sources {
        for (name, path) in collect(source, &options.ignore)? {
            if is_module(&path) {
                let text = std::fs::read_to_string(&path).map_err(BuildError::io(&path))?;
                let package = extract_package(&text, &name)?;
                debug!(module = %name, %package, "Collected module");
                insert_unique(&mut modules, name, Module { source: text, package })?;
            } else {
                let bytes = std::fs::read(&path).map_err(BuildError::io(&path))?;
                check_data(&path, &bytes)?;
                debug!(document = %name, "Collected data document");
                insert_unique(&mut data, name, bytes)?;
            }
        }
    }

    if modules.is_empty() {
        return Err(BuildError::NoModules {
            paths: sources
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    if options.validate {
        validate(&modules)?;
    }

    let roots = if options.roots.is_empty() {
        derive_roots(modules.values().map(|m| m.package.as_str()))
    } else {
        options.roots.clone()
    };
    let manifest = BundleManifest {
        revision: options.revision.clone(),
        roots: roots.clone(),
    };
    let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| BuildError::Archive {
        message: e.to_string(),
    })?;

    let mut entries: BTreeMap<&str, &[u8]> = BTreeMap::new();
    entries.insert(MANIFEST_ENTRY, &manifest_bytes);
    for (name, module) in &modules {
        entries.insert(name, module.source.as_bytes());
    }
    for (name, bytes) in &data {
        entries.insert(name, bytes);
    }
    write_archive(output, &entries)?;

    info!(modules = modules.len(), data = data.len(), "Built bundle");
    Ok(BuildSummary {
        modules: modules.into_keys().collect(),
        data: data.into_keys().collect(),
        roots,
    })
}

/// Returns `(archive name, path)` for every bundle input under `source`.
fn collect(source: &Path, ignore: &[String]) -> Result<Vec<(String, PathBuf)>> {
    let metadata = std::fs::metadata(source).map_err(BuildError::io(source))?;

    if metadata.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rel = Path::new(&name);
        if is_input(rel) && !is_ignored(rel, ignore) {
            return Ok(vec![(name, source.to_path_buf())]);
        }
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| BuildError::Io {
            path: e.path().map_or_else(|| source.to_path_buf(), Path::to_path_buf),
            source: e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        if !is_input(rel) || is_ignored(rel, ignore) {
            continue;
        }
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        found.push((name, entry.path().to_path_buf()));
    }

    Ok(found)
}

fn is_module(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "rego")
}

fn is_input(rel: &Path) -> bool {
    let Some(name) = rel.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if is_module(rel) {
        return !name.ends_with("_test.rego");
    }
    DATA_DOCUMENTS.contains(&name.as_ref())
}

fn is_ignored(rel: &Path, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            return rel
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(suffix));
        }
        rel.components()
            .any(|c| c.as_os_str().to_string_lossy() == pattern.as_str())
    })
}

fn insert_unique<V>(map: &mut BTreeMap<String, V>, name: String, value: V) -> Result<()> {
    if map.contains_key(&name) {
        return Err(BuildError::Archive {
            message: format!("duplicate bundle entry '{name}'"),
        });
    }
    map.insert(name, value);
    Ok(())
}

fn check_data(path: &Path, bytes: &[u8]) -> Result<()> {
    let invalid = |reason: String| BuildError::InvalidData {
        path: path.to_path_buf(),
        reason,
    };
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_slice::<serde_json::Value>(bytes).map_err(|e| invalid(e.to_string()))?;
    } else {
        serde_yaml::from_slice::<serde_yaml::Value>(bytes).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(())
}

fn validate(modules: &BTreeMap<String, Module>) -> Result<()> {
    let mut engine = regorus::Engine::new();
    for (name, module) in modules {
        engine
            .add_policy(name.clone(), module.source.clone())
            .map(|_| ())
            .map_err(|e| {
                let message = e.to_string();
                BuildError::ParseError {
                    file: name.clone(),
                    line: extract_line(&message).unwrap_or(1),
                    message,
                }
            })?;
    }
    Ok(())
}

/// Reads the package declaration of a module.
fn extract_package(source: &str, file: &str) -> Result<String> {
    for (line_num, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("package") {
            let package = rest.trim().trim_end_matches(';');
            if package.is_empty() {
                return Err(BuildError::ParseError {
                    file: file.to_string(),
                    line: line_num + 1,
                    message: "empty package name".to_string(),
                });
            }
            return Ok(package.to_string());
        }
        break;
    }
    Err(BuildError::MissingPackage {
        file: file.to_string(),
    })
}

/// Turns package names into the minimal set of non-overlapping roots.
fn derive_roots<'a>(packages: impl Iterator<Item = &'a str>) -> Vec<String> {
    let candidates: BTreeSet<String> = packages
        .map(|p| p.strip_prefix("data.").unwrap_or(p).replace('.', "/"))
        .collect();

    let mut roots: Vec<String> = Vec::new();
    for candidate in candidates {
        let covered = roots
            .iter()
            .any(|root| candidate == *root || candidate.starts_with(&format!("{root}/")));
        if !covered {
            roots.push(candidate);
        }
    }
    roots
}

fn extract_line(message: &str) -> Option<usize> {
    let lower = message.to_lowercase();
    if let Some(idx) = lower.find("line ") {
        if let Some(word) = message[idx + 5..].split_whitespace().next() {
            if let Ok(n) = word.trim_matches(|c: char| !c.is_ascii_digit()).parse() {
                return Some(n);
            }
        }
    }
    message
        .split(':')
        .filter_map(|part| part.trim().parse::<usize>().ok())
        .find(|n| *n > 0)
}

fn write_archive(output: &Path, entries: &BTreeMap<&str, &[u8]>) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(BuildError::io(parent))?;
    }
    let file = File::create(output).map_err(BuildError::io(output))?;
    let mut archive = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for (name, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).map_err(|e| BuildError::Archive {
            message: format!("invalid entry path {name}: {e}"),
        })?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        archive.append(&header, *bytes).map_err(BuildError::io(output))?;
    }

    let encoder = archive.into_inner().map_err(BuildError::io(output))?;
    let mut file = encoder.finish().map_err(BuildError::io(output))?;
    file.flush().map_err(BuildError::io(output))?;
    file.sync_all().map_err(BuildError::io(output))?;
    Ok(())
}
