use thiserror::Error;

use alchemist_core::CoreError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("compile failed: {0}")]
    Compile(#[from] CoreError),
    #[error("wasm runtime error: {0}")]
    Wasm(wasmi::Error),
    #[error("unknown handle {0}; host objects must be registered before use")]
    UnknownHandle(u32),
    #[error("export `{0}` is missing or has the wrong type")]
    MissingExport(String),
}

/// Fold the various wasmi error types into [`RuntimeError::Wasm`].
pub(crate) fn wasm_err(error: impl Into<wasmi::Error>) -> RuntimeError {
    RuntimeError::Wasm(error.into())
}
