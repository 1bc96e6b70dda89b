//! Change files on disk
//!
//! Each change lives in `{id}_{name}.toml` inside the migrations directory:
//!
//! ```toml
//! name = "add question code fields"   # optional, defaults to the file name
//!
//! [[up]]
//! op = "add_column"
//! table = "ImportedComprehensiveTrainingQuestions"
//! column = "CodeFilePath"
//! type = "varchar(500)"
//!
//! [[down]]
//! op = "drop_column"
//! table = "ImportedComprehensiveTrainingQuestions"
//! column = "CodeFilePath"
//! ```
//!
//! `down` may be omitted when every `up` operation has a derivable inverse.
//! `noop = true` marks a change whose effect was made out-of-band.

use super::descriptor::{generate_id, parse_change_id, ChangeDescriptor, ChangeRegistry};
use super::operation::SchemaOperation;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw contents of a change file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangeFile {
    name: Option<String>,
    #[serde(default)]
    noop: bool,
    #[serde(default)]
    up: Vec<SchemaOperation>,
    #[serde(default)]
    down: Vec<SchemaOperation>,
}

/// Parse one change file into a descriptor
pub fn load_change_file(path: impl AsRef<Path>) -> Result<ChangeDescriptor> {
    let path = path.as_ref();
    let (id, file_name) = split_file_name(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        Error::validation(format!(
            "Failed to read change file {}: {}",
            path.display(),
            e
        ))
    })?;
    let file: ChangeFile = toml::from_str(&content).map_err(|e| {
        Error::validation(format!(
            "Failed to parse change file {}: {}",
            path.display(),
            e
        ))
    })?;

    let name = file.name.unwrap_or(file_name);
    if file.noop {
        if !file.up.is_empty() || !file.down.is_empty() {
            return Err(Error::validation(format!(
                "Change {} is marked noop but lists operations",
                id
            )));
        }
        return ChangeDescriptor::noop(id, name);
    }

    if file.down.is_empty() {
        ChangeDescriptor::reversible(id, name, file.up)
    } else {
        ChangeDescriptor::new(id, name, file.up, file.down)
    }
}

/// `{id}_{name}.toml` into `(id, "name with spaces")`
fn split_file_name(path: &Path) -> Result<(String, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::validation(format!("Invalid change file name: {}", path.display())))?;

    match stem.split_once('_') {
        Some((id, name)) if !name.is_empty() => Ok((id.to_string(), name.replace('_', " "))),
        _ => Err(Error::validation(format!(
            "Change file name must follow format {{id}}_{{name}}.toml: {}",
            stem
        ))),
    }
}

/// Summary of one change file
#[derive(Debug, Clone)]
pub struct ChangeFileInfo {
    pub id: String,
    pub name: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub operations: usize,
    pub noop: bool,
    pub destructive: bool,
}

/// Validation result for a migrations directory
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid_count: usize,
    pub total_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Reads and creates change files in one directory
#[derive(Debug, Clone)]
pub struct ChangeLoader {
    dir: PathBuf,
}

impl ChangeLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn change_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            log::warn!(
                "Migrations directory {} does not exist",
                self.dir.display()
            );
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("toml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load every change file into a registry
    ///
    /// Any unreadable or invalid file fails the whole load.
    pub fn load_changes(&self) -> Result<ChangeRegistry> {
        let mut registry = ChangeRegistry::new();
        for path in self.change_files()? {
            registry.register(load_change_file(&path)?)?;
        }
        log::debug!(
            "Loaded {} change(s) from {}",
            registry.len(),
            self.dir.display()
        );
        Ok(registry)
    }

    /// Summaries of every loadable change file, in id order
    pub fn list_changes(&self) -> Result<Vec<ChangeFileInfo>> {
        let mut items = Vec::new();
        for path in self.change_files()? {
            let change = load_change_file(&path)?;
            items.push(ChangeFileInfo {
                id: change.id().to_string(),
                name: change.name().to_string(),
                created_at: change.created_at(),
                operations: change.up().len(),
                noop: change.is_noop(),
                destructive: change.is_destructive(),
                file_path: path,
            });
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// Check every change file without touching the database
    pub fn validate_changes(&self) -> Result<ValidationResult> {
        let files = self.change_files()?;
        let mut result = ValidationResult {
            total_count: files.len(),
            ..ValidationResult::default()
        };

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for path in files {
            let change = match load_change_file(&path) {
                Ok(change) => change,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };

            if let Some(first) = seen.get(change.id()) {
                result.errors.push(format!(
                    "Change {} has duplicate id ({} and {})",
                    change.id(),
                    first.display(),
                    path.display()
                ));
                continue;
            }

            if change.is_noop() {
                result
                    .warnings
                    .push(format!("Change {} is a no-op placeholder", change.id()));
            }
            for note in change.data_loss_notes() {
                result
                    .warnings
                    .push(format!("Change {}: {}", change.id(), note));
            }

            seen.insert(change.id().to_string(), path);
            result.valid_count += 1;
        }

        Ok(result)
    }

    /// Write a new change file template and return its path
    pub fn create_change(&self, name: &str) -> Result<PathBuf> {
        if name.trim().is_empty() {
            return Err(Error::validation("Change name cannot be empty"));
        }
        if name.len() > 100 {
            return Err(Error::validation(
                "Change name too long (max 100 characters)",
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == ' ' || c == '-')
        {
            return Err(Error::validation(
                "Change name can only contain letters, numbers, spaces, hyphens, and underscores",
            ));
        }

        let id = generate_id();
        // Generated ids are always valid
        let created_at = parse_change_id(&id)?;
        let file_name = format!("{}_{}.toml", id, name.trim().replace(' ', "_").to_lowercase());
        let file_path = self.dir.join(file_name);
        if file_path.exists() {
            return Err(Error::validation(format!(
                "Change file {} already exists",
                file_path.display()
            )));
        }

        let template = format!(
            r#"# Change: {}
# Created: {}
#
# Operations: add_column, drop_column, create_index, drop_index, update_row,
# create_table, drop_table, alter_column, sql.
# `down` may be omitted when every `up` operation can be inverted.

# [[up]]
# op = "add_column"
# table = "Users"
# column = "PhoneNumber"
# type = "varchar(20)"
#
# [[up]]
# op = "create_index"
# table = "Users"
# index_name = "IX_Users_PhoneNumber"
# columns = ["PhoneNumber"]
"#,
            name,
            created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        fs::create_dir_all(&self.dir)?;
        fs::write(&file_path, template)?;
        log::info!("Created change file {}", file_path.display());

        Ok(file_path)
    }
}
