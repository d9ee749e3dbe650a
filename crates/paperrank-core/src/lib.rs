pub mod cancel;
pub mod config;
pub mod document;
pub mod error;
pub mod types;

pub use cancel::{CancelFlag, ShutdownSignal};
pub use config::PaperrankConfig;
pub use document::ExtractedDocument;
pub use error::{ErrorClass, PaperrankError, Result};
pub use types::*;
