//! Static slide catalog, loaded once at startup.
//!
//! The catalog file is YAML or JSON with a top-level `slides` list. Slides
//! are addressed by ordinal position (the host broadcasts positions) and,
//! for reopen events, by id.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ErrorCode;
use crate::model::SlideDefinition;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog contains no slides")]
    Empty,
    #[error("duplicate slide id {0}")]
    DuplicateId(u32),
}

impl ErrorCode for CatalogError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_CATALOG_IO",
            Self::Yaml(_) | Self::Json(_) => "E_CATALOG_PARSE",
            Self::Empty => "E_CATALOG_EMPTY",
            Self::DuplicateId(_) => "E_CATALOG_DUPLICATE_ID",
        }
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    slides: Vec<SlideDefinition>,
}

/// Immutable, ordered slide definitions.
#[derive(Debug, Clone)]
pub struct SlideCatalog {
    slides: Vec<SlideDefinition>,
    positions_by_id: HashMap<u32, usize>,
}

impl SlideCatalog {
    /// Index an ordered list of slides.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Empty`] for an empty list and
    /// [`CatalogError::DuplicateId`] when two slides share an id.
    pub fn new(slides: Vec<SlideDefinition>) -> Result<Self, CatalogError> {
        if slides.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut positions_by_id = HashMap::with_capacity(slides.len());
        for (position, slide) in slides.iter().enumerate() {
            if positions_by_id.insert(slide.id, position).is_some() {
                return Err(CatalogError::DuplicateId(slide.id));
            }
        }
        Ok(Self { slides, positions_by_id })
    }

    /// # Errors
    ///
    /// Returns a parse error or any error from [`SlideCatalog::new`].
    pub fn from_yaml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        Self::new(file.slides)
    }

    /// # Errors
    ///
    /// Returns a parse error or any error from [`SlideCatalog::new`].
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::new(file.slides)
    }

    /// Load a catalog file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the file cannot be read, otherwise the
    /// errors of the matching parser.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json { Self::from_json_str(&raw) } else { Self::from_yaml_str(&raw) }
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&SlideDefinition> {
        self.slides.get(position)
    }

    #[must_use]
    pub fn position_of(&self, slide_id: u32) -> Option<usize> {
        self.positions_by_id.get(&slide_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
