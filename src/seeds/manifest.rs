//! Category manifest loading and validation.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::SeedError;

/// One category as declared in a seed manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryEntry {
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_expense: bool,
    #[serde(default)]
    pub is_income: bool,
    /// Code of the parent category, in this manifest or already in the database.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CategoryEntry {
    /// Label used in logs and errors.
    pub fn label(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct CategoryManifest {
    pub path: PathBuf,
    pub entries: Vec<CategoryEntry>,
}

impl CategoryManifest {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let raw = fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &raw)
    }

    /// Accepts either a bare list or a mapping with a `categories` list.
    pub fn parse(path: &Path, raw: &str) -> Result<Self, SeedError> {
        let invalid = |message: &str| SeedError::InvalidManifest {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        let document: Value = serde_yaml::from_str(raw).map_err(|source| SeedError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        let list = match document {
            Value::Null => Value::Sequence(Vec::new()),
            Value::Sequence(_) => document,
            Value::Mapping(mut map) => map
                .remove("categories")
                .ok_or_else(|| invalid("missing 'categories' key"))?,
            _ => return Err(invalid("expected a list or a mapping with 'categories'")),
        };

        let entries: Vec<CategoryEntry> = match list {
            Value::Null => Vec::new(),
            Value::Sequence(_) => {
                serde_yaml::from_value(list).map_err(|source| SeedError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => return Err(invalid("'categories' must be a list of category entries")),
        };

        let manifest = Self {
            path: path.to_path_buf(),
            entries,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), SeedError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.name.trim().is_empty() {
                return Err(SeedError::InvalidManifest {
                    path: self.path.clone(),
                    message: format!("category '{}' has an empty name", entry.label()),
                });
            }
            if let Some(code) = &entry.code
                && !seen.insert(code.as_str())
            {
                return Err(SeedError::InvalidManifest {
                    path: self.path.clone(),
                    message: format!("duplicate category code '{code}'"),
                });
            }
        }

        if let Some(codes) = find_parent_cycle(&self.entries) {
            return Err(SeedError::ParentCycle {
                manifest: self.path.clone(),
                codes,
            });
        }

        Ok(())
    }
}

/// Returns the first parent cycle among coded entries, as the chain of codes
/// with the repeated code at both ends.
pub fn find_parent_cycle(entries: &[CategoryEntry]) -> Option<Vec<String>> {
    let parents: HashMap<&str, &str> = entries
        .iter()
        .filter_map(|entry| Some((entry.code.as_deref()?, entry.parent.as_deref()?)))
        .collect();

    let mut cleared: HashSet<&str> = HashSet::new();
    for entry in entries {
        let Some(start) = entry.code.as_deref() else {
            continue;
        };
        let mut chain: Vec<&str> = Vec::new();
        let mut current = Some(start);
        while let Some(code) = current {
            if cleared.contains(code) {
                break;
            }
            if let Some(pos) = chain.iter().position(|seen| *seen == code) {
                let mut cycle: Vec<String> = chain[pos..].iter().map(|c| c.to_string()).collect();
                cycle.push(code.to_string());
                return Some(cycle);
            }
            chain.push(code);
            current = parents.get(code).copied();
        }
        cleared.extend(chain);
    }
    None
}

/// Lists `*.yml`/`*.yaml` files in `dir`, sorted, skipping `template.*`.
/// A missing directory yields no files.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, SeedError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SeedError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files = Vec::new();
    for item in read_dir {
        let path = item
            .map_err(|source| SeedError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if !path.is_file() || !is_yaml(&path) || is_template(&path) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
}

fn is_template(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.eq_ignore_ascii_case("template"))
}
