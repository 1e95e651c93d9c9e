// Utilities module
// Path shaping, ignore rules, digests and atomic writes

pub mod atomic;
pub mod checksum;
pub mod paths;
pub mod patterns;

pub use atomic::write_atomic;
pub use checksum::{digest_bytes, digest_file};
pub use paths::{normalize_path, to_device_path, to_local_relative};
pub use patterns::{ensure_default_rules, IgnoreMatcher, METADATA_DIR};
