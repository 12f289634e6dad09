use std::fmt;

use crate::model::{Element, ElementSeed, EntitySeed};
use crate::view::View;

use super::ingest::IngestReport;
use super::retrieve::{AdjacentSeedStream, ElementStream, GetOptions};
use super::staging::StagingReport;

/// A request dispatched through [`GraphStore::execute`](super::GraphStore::execute).
pub enum Operation {
    /// Writes elements.
    AddElements {
        /// Elements to write; `None`s are skipped.
        elements: Vec<Option<Element>>,
    },
    /// Elements matching seeds.
    GetElements {
        /// Entity and edge seeds.
        seeds: Vec<ElementSeed>,
        /// Groups, filters and aggregation.
        view: View,
        /// Retrieval options.
        options: GetOptions,
    },
    /// Every element.
    GetAllElements {
        /// Groups, filters and aggregation.
        view: View,
        /// Retrieval options.
        options: GetOptions,
    },
    /// Far endpoints of edges touching the seeds.
    GetAdjacentEntitySeeds {
        /// Entity seeds.
        seeds: Vec<EntitySeed>,
        /// Edge groups and filters.
        view: View,
        /// Retrieval options.
        options: GetOptions,
    },
    /// Writes elements through a staged file.
    ImportFromStaging {
        /// Elements to stage.
        elements: Vec<Element>,
    },
    /// An operation handled by another layer, identified by name.
    Other {
        /// Operation kind, e.g. `"GenerateElements"`.
        kind: String,
    },
}

impl Operation {
    /// Kind name used in logs and errors.
    pub fn kind(&self) -> &str {
        match self {
            Operation::AddElements { .. } => "AddElements",
            Operation::GetElements { .. } => "GetElements",
            Operation::GetAllElements { .. } => "GetAllElements",
            Operation::GetAdjacentEntitySeeds { .. } => "GetAdjacentEntitySeeds",
            Operation::ImportFromStaging { .. } => "ImportFromStaging",
            Operation::Other { kind } => kind,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("kind", &self.kind()).finish()
    }
}

/// Result of [`GraphStore::execute`](super::GraphStore::execute).
pub enum OperationOutput {
    /// Ingest summary.
    Ingested(IngestReport),
    /// Element results.
    Elements(ElementStream),
    /// Adjacent seeds.
    Seeds(AdjacentSeedStream),
    /// Staged import summary.
    Staged(StagingReport),
}
