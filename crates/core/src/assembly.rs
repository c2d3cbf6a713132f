//! Assembly versus single-part detection from raw STEP text.

use crate::models::AssemblyKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyMethod {
    /// More than one `PRODUCT(` entity means an assembly.
    #[default]
    EntityCount,
    /// Keyword presence. Most single parts still mention `PRODUCT`, so this
    /// reports nearly everything as an assembly.
    Keywords,
}

static RE_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PRODUCT\(").expect("valid product regex"));

pub fn classify_text(text: &str) -> AssemblyKind {
    classify_text_with(text, AssemblyMethod::EntityCount)
}

pub fn classify_text_with(text: &str, method: AssemblyMethod) -> AssemblyKind {
    match method {
        AssemblyMethod::EntityCount => {
            if RE_PRODUCT.find_iter(text).count() > 1 {
                AssemblyKind::Assembly
            } else {
                AssemblyKind::Part
            }
        }
        AssemblyMethod::Keywords => {
            if text.contains("ASSEMBLY") || text.contains("PRODUCT") {
                AssemblyKind::Assembly
            } else if text.contains("MANIFOLD_SOLID_BREP") {
                AssemblyKind::Part
            } else {
                AssemblyKind::Undetermined
            }
        }
    }
}

/// Classifies a file on disk. Unreadable files are `Undetermined`, never an error.
pub fn classify_file(path: &Path, method: AssemblyMethod) -> AssemblyKind {
    match fs::read(path) {
        Ok(bytes) => classify_text_with(&String::from_utf8_lossy(&bytes), method),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not read file for assembly check");
            AssemblyKind::Undetermined
        }
    }
}
