//! Change descriptors and the change registry

use super::operation::SchemaOperation;
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// One reversible schema change
///
/// Immutable once built: `up` runs forward, `down` reverses it. Ids are
/// 14-digit UTC timestamps (`YYYYMMDDHHMMSS`) and are the only ordering and
/// identity key; names are labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDescriptor {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    up: Vec<SchemaOperation>,
    down: Vec<SchemaOperation>,
    noop: bool,
}

impl ChangeDescriptor {
    /// Build a change with an explicit inverse
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        up: Vec<SchemaOperation>,
        down: Vec<SchemaOperation>,
    ) -> Result<Self> {
        let id = id.into();
        let created_at = parse_change_id(&id)?;

        if up.is_empty() {
            return Err(Error::validation(format!(
                "Change {} has no up operations",
                id
            )));
        }
        if down.is_empty() {
            return Err(Error::validation(format!(
                "Change {} has no down operations",
                id
            )));
        }

        for op in up.iter().chain(down.iter()) {
            op.validate().map_err(|e| match e {
                Error::Validation(msg) => Error::validation(format!("Change {}: {}", id, msg)),
                other => other,
            })?;
        }

        Ok(Self {
            id,
            name: name.into(),
            created_at,
            up,
            down,
            noop: false,
        })
    }

    /// Build a change whose inverse is derived from `up`
    ///
    /// Every operation must have a self-derivable inverse; the derived `down`
    /// runs the inverses in reverse order.
    pub fn reversible(
        id: impl Into<String>,
        name: impl Into<String>,
        up: Vec<SchemaOperation>,
    ) -> Result<Self> {
        let id = id.into();
        let down = derive_down(&id, &up)?;
        Self::new(id, name, up, down)
    }

    /// Placeholder for a change whose effect was already made out-of-band
    ///
    /// Keeps the id in the history so later changes stay well-ordered.
    pub fn noop(id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let created_at = parse_change_id(&id)?;
        Ok(Self {
            id,
            name: name.into(),
            created_at,
            up: Vec::new(),
            down: Vec::new(),
            noop: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn up(&self) -> &[SchemaOperation] {
        &self.up
    }

    pub fn down(&self) -> &[SchemaOperation] {
        &self.down
    }

    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Whether applying this change can discard stored data
    pub fn is_destructive(&self) -> bool {
        self.up.iter().any(SchemaOperation::is_destructive)
    }

    /// Data-loss notes for both directions, prefixed with the direction
    pub fn data_loss_notes(&self) -> Vec<String> {
        let up = self
            .up
            .iter()
            .filter_map(|op| op.data_loss_note().map(|note| format!("up: {}", note)));
        let down = self
            .down
            .iter()
            .filter_map(|op| op.data_loss_note().map(|note| format!("down: {}", note)));
        up.chain(down).collect()
    }
}

/// Invert `up` operation by operation, in reverse order
pub fn derive_down(id: &str, up: &[SchemaOperation]) -> Result<Vec<SchemaOperation>> {
    up.iter()
        .rev()
        .map(|op| {
            op.inverse().ok_or_else(|| {
                Error::validation(format!(
                    "Change {} needs explicit down operations: cannot invert '{}'",
                    id, op
                ))
            })
        })
        .collect()
}

/// Parse a change id (`YYYYMMDDHHMMSS`) into its timestamp
pub fn parse_change_id(id: &str) -> Result<DateTime<Utc>> {
    if id.len() != 14 || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation(format!(
            "Change id must be 14 digits (YYYYMMDDHHMMSS): {}",
            id
        )));
    }

    let field = |range: std::ops::Range<usize>| -> u32 {
        // Digits were checked above
        id[range].parse().unwrap_or_default()
    };

    Utc.with_ymd_and_hms(
        field(0..4) as i32,
        field(4..6),
        field(6..8),
        field(8..10),
        field(10..12),
        field(12..14),
    )
    .single()
    .ok_or_else(|| Error::validation(format!("Invalid datetime in change id: {}", id)))
}

/// Generate a new change id based on the current time
pub fn generate_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Registered changes keyed by id, iterated in ascending id order
#[derive(Debug, Clone, Default)]
pub struct ChangeRegistry {
    changes: BTreeMap<String, ChangeDescriptor>,
}

impl ChangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting duplicate ids
    pub fn from_changes(changes: impl IntoIterator<Item = ChangeDescriptor>) -> Result<Self> {
        let mut registry = Self::new();
        for change in changes {
            registry.register(change)?;
        }
        Ok(registry)
    }

    /// Register a change; ids are never reused
    pub fn register(&mut self, change: ChangeDescriptor) -> Result<()> {
        if let Some(existing) = self.changes.get(change.id()) {
            return Err(Error::validation(format!(
                "Change id {} is already registered (by '{}')",
                change.id(),
                existing.name()
            )));
        }
        self.changes.insert(change.id.clone(), change);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ChangeDescriptor> {
        self.changes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.changes.contains_key(id)
    }

    /// Changes in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &ChangeDescriptor> {
        self.changes.values()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn latest(&self) -> Option<&ChangeDescriptor> {
        self.changes.values().next_back()
    }
}
