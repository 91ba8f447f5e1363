pub mod error;
pub mod extract;
pub mod types;

pub use error::UnknownBlockError;
pub use extract::{extract_blocks, scan_blocks, Extraction, ParseAmbiguity};
pub use types::*;
