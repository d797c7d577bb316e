//! Startup seeding of parents from a JSON file.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use rotor_reconcile::Parent;

/// Read a JSON array of parents.
pub fn load_parents(path: &Path) -> Result<Vec<Parent>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid parents in seed file {}", path.display()))
}
