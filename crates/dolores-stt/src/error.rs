//! Re-exports the shared STT error taxonomy.
//!
//! The concrete variants live in `dolores-foundation` so that the Session
//! Controller can match on `SttError` without depending on this crate for
//! the type alone; this module just gives local call sites a short name.

pub use dolores_foundation::error::SttError;

pub type SttResult<T> = Result<T, SttError>;
