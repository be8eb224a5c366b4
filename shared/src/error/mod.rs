pub mod types;

pub use types::TidewaterError;

/// Shorthand Result type used throughout Tidewater.
pub type Result<T> = std::result::Result<T, TidewaterError>;
