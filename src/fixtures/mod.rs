//! Shared fixtures
//!
//! A fixture is created at most once per scope (assembly, collection or
//! class), handed to every test in that scope, and disposed after the scope's
//! last test finished.

mod manager;

pub use manager::{FixtureDefinition, FixtureLookup, FixtureMappingManager};

use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lifetime of a fixture instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureScope {
    Assembly,
    Collection,
    Class,
}

impl fmt::Display for FixtureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureScope::Assembly => write!(f, "assembly"),
            FixtureScope::Collection => write!(f, "collection"),
            FixtureScope::Class => write!(f, "class"),
        }
    }
}

/// Shared dependency injected into tests
pub trait Fixture: Send + Sync + 'static {
    /// Release the fixture; called once, when its scope completes
    fn dispose(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Debug, Error)]
pub enum FixtureError {
    #[error("Fixture {type_name} failed to initialize: {cause:#}")]
    Creation {
        type_name: &'static str,
        cause: Arc<anyhow::Error>,
    },

    #[error("Fixture {0} is not available in {1} scope or any parent scope")]
    Missing(&'static str, FixtureScope),

    #[error("Fixtures of {0} scope '{1}' are already disposed")]
    Disposed(FixtureScope, String),
}
