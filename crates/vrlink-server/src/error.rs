use thiserror::Error;
use vrlink_core::{AliasError, PathError, ResolveError, RouteError};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Alias error: {0}")]
    Alias(#[from] AliasError),
    #[error("Route error: {0}")]
    Route(#[from] RouteError),
    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Unknown interface handle {0}")]
    UnknownInterface(usize),
}
