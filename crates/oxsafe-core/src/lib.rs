pub mod config;
pub mod crypto;
pub mod error;
pub mod format;
pub mod fs;
pub mod import;
pub mod lock;

pub use config::EngineConfig;
pub use format::{FileVersion, RwMode, VersionedFile, check_password, make_pws_file};
pub use lock::{LockManager, LockOutcome};
