pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{extract_host, is_fetchable_url, loggable_url, truncate_message};
