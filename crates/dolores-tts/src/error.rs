pub use dolores_foundation::error::TtsError;

pub type TtsResult<T> = Result<T, TtsError>;
