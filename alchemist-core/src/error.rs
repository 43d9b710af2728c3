use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("syntax error at {line}:{col}: {message}")]
    Syntax { line: u32, col: u32, message: String },
    #[error("type error at {line}:{col}: {message}")]
    Type { line: u32, col: u32, message: String },
}

impl CoreError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, CoreError::Syntax { .. })
    }

    pub fn is_type(&self) -> bool {
        matches!(self, CoreError::Type { .. })
    }
}
