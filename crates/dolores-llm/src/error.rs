pub use dolores_foundation::error::LlmError;

pub type LlmResult<T> = Result<T, LlmError>;
