// src/constants.rs
//
// Centralized constants for s3filestore to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Region handed to the SDK when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default lifetime of presigned GET URLs (24 hours)
pub const DEFAULT_PRESIGNED_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest object name produced by `get_available_name` when the caller does not pass one
pub const DEFAULT_MAX_NAME_LENGTH: usize = 1024;

/// Default cap on candidate names tried before giving up
pub const DEFAULT_MAX_NAME_ATTEMPTS: usize = 1000;

/// Inclusive lower bound of the random suffix appended to colliding names
pub const NAME_SUFFIX_MIN: u32 = 100;

/// Exclusive upper bound of the random suffix
pub const NAME_SUFFIX_MAX: u32 = 999;

/// Delimiter used for non-recursive listings
pub const LIST_DELIMITER: &str = "/";

/// Connect timeout applied to the S3 client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Operation timeout applied to the S3 client (overridable via S3FS_OPERATION_TIMEOUT_SECS)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 120;

/// Upper bound on worker threads of the blocking runtime (overridable via S3FS_RT_THREADS)
pub const MAX_RUNTIME_THREADS: usize = 32;

/// App name reported with statically configured credentials
pub const CREDENTIALS_PROVIDER_NAME: &str = "s3filestore";
