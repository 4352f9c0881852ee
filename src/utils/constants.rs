//! Shared configuration constants for dragnet
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Default number of jobs per shard.
///
/// 500 keeps checkpoint files small and bounds browser-handle lifetime:
/// the handle is recreated per shard, so a crashed shard loses at most
/// this many in-flight URLs of progress.
pub const DEFAULT_SHARD_SIZE: usize = 500;

/// Default global concurrency slot count before env overrides.
pub const DEFAULT_GLOBAL_CONCURRENCY: usize = 16;

/// Bounds applied to the global slot count regardless of source.
pub const GLOBAL_CONCURRENCY_MIN: usize = 8;
pub const GLOBAL_CONCURRENCY_MAX: usize = 64;

/// Default per-host concurrency slots.
pub const DEFAULT_PER_HOST_CONCURRENCY: usize = 4;

/// Combined error+CAPTCHA count after which a host is clamped to one slot.
pub const HOST_CLAMP_THRESHOLD: u32 = 5;

/// HTTP per-request timeout bounds in seconds.
pub const HTTP_TIMEOUT_MIN_SECS: u64 = 5;
pub const HTTP_TIMEOUT_MAX_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Browser navigation timeout bounds in seconds.
pub const NAV_TIMEOUT_MIN_SECS: u64 = 10;
pub const NAV_TIMEOUT_MAX_SECS: u64 = 45;
pub const DEFAULT_NAV_TIMEOUT_SECS: u64 = 30;

/// Browser page concurrency bounds.
pub const BROWSER_CONCURRENCY_MIN: usize = 1;
pub const BROWSER_CONCURRENCY_MAX: usize = 4;
pub const DEFAULT_BROWSER_CONCURRENCY: usize = 2;

/// Bodies larger than this are discarded and recorded as `too_large`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Body prefix handed to the block classifier (bytes).
pub const CLASSIFIER_PREFIX_BYTES: usize = 200 * 1024;

/// HTTP responses shorter than this are considered incomplete and
/// escalated to the browser stage.
pub const DEFAULT_THIN_CONTENT_BYTES: usize = 1024;

/// Maximum transparent retries for transient HTTP failures.
pub const MAX_HTTP_RETRIES: u32 = 2;

/// Browser handle is closed and relaunched after this many contexts.
pub const DEFAULT_BROWSER_RECYCLE_AFTER: usize = 50;

/// Records buffered in memory before the result store flushes to disk.
pub const DEFAULT_RECORD_BUFFER: usize = 100;

/// Combined captcha+http_error+timeout rate above which the batch
/// guardrail trips (halve concurrency, then abort on a second trip).
pub const GUARDRAIL_BAD_RATE: f64 = 0.40;

/// Redirect hops allowed when fetching robots.txt before failing open.
pub const ROBOTS_MAX_REDIRECTS: usize = 5;

/// Short timeout for robots.txt fetches in seconds.
pub const ROBOTS_FETCH_TIMEOUT_SECS: u64 = 5;

/// Truncation limit for persisted error messages.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 300;

/// Rotating User-Agent pool for the HTTP stage.
///
/// Chrome stable across the three desktop OS families. Updated 2025-06-20
/// to Chrome 137; refresh quarterly alongside the browser profiles in
/// `stealth::profiles`.
pub const USER_AGENT_POOL: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
];

/// Rotating Accept-Language pool paired with the UA pool.
pub const ACCEPT_LANGUAGE_POOL: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.8,de;q=0.5",
    "en-US,en;q=0.9,fr;q=0.6",
];

/// Markers in an HTTP body that indicate the page requires JavaScript
/// and should be escalated to the browser stage.
pub const JS_REQUIRED_MARKERS: &[&str] = &[
    "please enable javascript",
    "javascript is required",
    "javascript is disabled",
    "enable javascript to continue",
    "requires javascript",
];
