pub mod content;
pub mod filesystem;
pub mod paths;

pub use content::{ContentStore, CopyOutcome, DirEntry};
pub use filesystem::LocalContentStore;
