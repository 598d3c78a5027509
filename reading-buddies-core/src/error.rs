//! Error types for the reading buddies engine.
//!
//! This module provides a unified error type for all operations in the
//! reading-buddies-core library, including persistence, asset loading,
//! animation and audio playback, and analytics delivery.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for reading-buddies-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key-value store could not read or write a key.
    #[error("storage error for key '{key}': {message}")]
    Storage {
        /// The key being accessed.
        key: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A value could not be encoded or decoded as JSON.
    #[error("failed to serialize {context}: {source}")]
    Serialization {
        /// What was being (de)serialized.
        context: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An asset could not be fetched from the asset source.
    #[error("failed to fetch asset '{path}': {message}")]
    AssetFetch {
        /// The requested asset path.
        path: String,
        /// Description of what went wrong.
        message: String,
    },

    /// An asset was fetched but was not valid JSON for the expected shape.
    #[error("failed to parse asset '{path}': {source}")]
    AssetParse {
        /// The asset path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The animation engine failed to load a source.
    #[error("failed to load animation '{src}': {message}")]
    AnimationLoad {
        /// The animation source path.
        src: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The audio backend failed to decode or play a buffer.
    #[error("audio error: {message}")]
    Audio {
        /// Description of what went wrong.
        message: String,
    },

    /// The analytics transport rejected a batch.
    #[error("analytics transport failed: {message}")]
    Transport {
        /// Description of what went wrong.
        message: String,
    },

    /// A file backing a store or asset source could not be accessed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An operation needed a loaded character but none is loaded.
    #[error("no character loaded")]
    NotLoaded,

    /// Character switching was requested without a shared multi-character config.
    #[error("no multi-character config loaded")]
    NoSharedConfig,

    /// The shared config has no artboard mapping for the requested variant.
    #[error("unknown character variant: '{variant}'")]
    UnknownVariant {
        /// The requested variant.
        variant: String,
    },

    /// An error that doesn't fit other categories.
    #[error("{message}")]
    Other {
        /// Description of the error.
        message: String,
    },
}

impl Error {
    /// Create a new `Storage` error for the given key.
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new `AssetFetch` error for the given path.
    pub fn asset_fetch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AssetFetch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new `AnimationLoad` error for the given source.
    pub fn animation_load(src: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AnimationLoad {
            src: src.into(),
            message: message.into(),
        }
    }

    /// Create a new `Audio` error with the given message.
    pub fn audio(message: impl Into<String>) -> Self {
        Self::Audio {
            message: message.into(),
        }
    }

    /// Create a new `Transport` error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new `UnknownVariant` error.
    pub fn unknown_variant(variant: impl Into<String>) -> Self {
        Self::UnknownVariant {
            variant: variant.into(),
        }
    }

    /// Create a new `Other` error with the given message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for reading-buddies-core operations.
pub type Result<T> = std::result::Result<T, Error>;
