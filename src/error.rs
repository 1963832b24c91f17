use thiserror::Error;

use crate::codec::DecodeError;
use crate::config::ConfigError;
use crate::core::ValidationError;
use crate::git::PublishError;
use crate::index::IndexError;
use crate::registry::RegistryError;
use crate::remote::RemoteReadError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the canonical capability errors; callers that care
/// about retry policy go through `transience()`/`effect()`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Read(#[from] RemoteReadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<crate::core::InvalidRepoName> for Error {
    fn from(e: crate::core::InvalidRepoName) -> Self {
        Error::Validation(e.into())
    }
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Validation(e) => e.transience(),
            Error::Decode(e) => e.transience(),
            Error::Publish(e) => e.transience(),
            Error::Registry(e) => e.transience(),
            Error::Read(e) => e.transience(),
            Error::Index(e) => e.transience(),
            Error::Config(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Validation(e) => e.effect(),
            Error::Decode(e) => e.effect(),
            Error::Publish(e) => e.effect(),
            Error::Registry(e) => e.effect(),
            Error::Read(e) => e.effect(),
            Error::Index(e) => e.effect(),
            Error::Config(e) => e.effect(),
        }
    }
}
