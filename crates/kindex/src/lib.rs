// Copyright 2026 Kindex Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Kind resolution, label selection, status normalization and self-healing watches
//! for Kubernetes resources

/// Errors surfaced by the registry, selector and status engines
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The cluster API call itself failed
    #[error("Upstream Error: {0}")]
    Upstream(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Malformed `apiVersion` strings
    #[error("Parse Error: {0}")]
    ParseError(#[from] ParseGroupVersionError),

    /// The kind could not be located, even after a registry refresh
    #[error("kind {kind} not found for api version '{api_version}'")]
    UnknownKind {
        /// Requested kind
        kind: String,
        /// Requested api version, may be empty
        api_version: String,
    },

    /// The kind resolved but the object could not be read.
    /// The cluster does not tell a missing namespace apart from a missing name.
    #[error("either namespace or name not found: {namespace}/{name}")]
    ObjectNotFound {
        /// Requested namespace, empty for cluster scoped reads
        namespace: String,
        /// Requested object name
        name: String,
    },

    /// A namespaced operation was requested for a cluster scoped kind
    #[error("kind {0} is cluster scoped")]
    ClusterScoped(String),

    /// A path or selector expression failed to parse
    #[error("Malformed Expression: {0}")]
    MalformedExpression(String),

    /// The embedded status algorithm failed or produced unusable output
    #[error("Script Failure: {0}")]
    ScriptFailure(String),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::ScriptFailure(format!("{err:#}"))
    }
}

/// Generic result type used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod config;
mod diagnostics;
pub mod path;
pub mod registry;
pub mod selector;
pub mod status;
pub mod telemetry;
pub mod watch;

use kube::core::gvk::ParseGroupVersionError;

pub use crate::diagnostics::*;
