use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the resource layer.
///
/// The first three variants are configuration errors: they point at a bug in the
/// registry setup or in the caller, and are returned synchronously from the call that
/// hit them. Everything else describes a failed fetch or decode and is carried by a
/// failed [`Pollable`](crate::Pollable) rather than returned directly.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("unknown resource loader `{0}`")]
    UnknownLoader(String),
    #[error("loader `{loader}` does not support {capability} descriptor access")]
    MissingCapability {
        loader: String,
        capability: &'static str,
    },
    #[error("no configured prefix matches nodepath `{0}`")]
    NoMatchingPrefix(String),
    #[error("loader `{0}` has no image loader")]
    NoImageLoader(String),

    #[error("{0} has not been loaded yet")]
    NotLoaded(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no content stored for `{0}`")]
    NotFound(String),
    #[error("invalid json at `{url}`: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode image `{url}`: {source}")]
    Image {
        url: String,
        #[source]
        source: image::ImageError,
    },
    #[error("atlas `{atlas}` has no region `{region}`")]
    MissingRegion { atlas: String, region: String },

    #[error(transparent)]
    Shared(#[from] std::sync::Arc<ResourceError>),

    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl ResourceError {
    /// Whether this error is a configuration error (caller or registry bug) rather than
    /// a data error.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ResourceError::UnknownLoader(_)
                | ResourceError::MissingCapability { .. }
                | ResourceError::NoMatchingPrefix(_)
                | ResourceError::NoImageLoader(_)
                | ResourceError::Config(_)
                | ResourceError::Toml(_)
        ) || matches!(self, ResourceError::Shared(inner) if inner.is_configuration())
    }
}

pub type Result<T, E = ResourceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        assert!(ResourceError::UnknownLoader("npc".into()).is_configuration());
        assert!(ResourceError::NoMatchingPrefix("Map9/1".into()).is_configuration());
        assert!(!ResourceError::NotFound("a.json".into()).is_configuration());
        assert!(
            !ResourceError::MissingRegion {
                atlas: "UI/Basic".into(),
                region: "cursor".into()
            }
            .is_configuration()
        );
    }

    #[test]
    fn messages_name_the_offender() {
        let err = ResourceError::UnknownLoader("npc".into());
        assert_eq!(err.to_string(), "unknown resource loader `npc`");
    }
}
