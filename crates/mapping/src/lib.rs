// Copyright 2026 Kindex Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Configuration documents consumed by the kindex status engine

pub mod mapping;
pub mod status;

pub use mapping::{EmptyMapping, PathMatch, StatusMapping, StatusMappingDocument};
pub use status::{KnownStatusConfig, Localized, StatusObject};

/// JSON schema of a status mapping document, for config authors and linters
#[must_use]
pub fn mapping_schema() -> schemars::Schema {
    schemars::schema_for!(StatusMappingDocument)
}

/// JSON schema of the known-status vocabulary document
#[must_use]
pub fn vocabulary_schema() -> schemars::Schema {
    schemars::schema_for!(KnownStatusConfig)
}
