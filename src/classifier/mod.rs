//! Block / CAPTCHA classifier shared by both fetch stages.
//!
//! Pattern-matches a response (status, final URL, server header, body
//! prefix) into a typed verdict. Pure function over its inputs: no I/O,
//! no state. Called on every HTTP response body and on rendered browser
//! page content.

use log::debug;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::utils::CLASSIFIER_PREFIX_BYTES;

/// Vendor attribution of a detected block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockVendor {
    Recaptcha,
    Hcaptcha,
    Turnstile,
    CloudflareBlock,
    GenericBlock,
    None,
}

/// Classifier output for one response.
#[derive(Debug, Clone)]
pub struct BlockVerdict {
    pub present: bool,
    pub vendor: BlockVendor,
    pub confidence: f32,
    pub reason: String,
}

impl BlockVerdict {
    fn clean() -> Self {
        Self {
            present: false,
            vendor: BlockVendor::None,
            confidence: 0.0,
            reason: String::new(),
        }
    }
}

/// Borrowed view of the signals the classifier inspects.
///
/// `body` may be arbitrarily large; only the first 200 KB are examined.
#[derive(Debug, Clone, Copy)]
pub struct PageSignals<'a> {
    pub status: u16,
    pub final_url: &'a str,
    pub server: Option<&'a str>,
    pub body: &'a str,
}

/// Vendor widget signatures. Any single hit is conclusive.
static VENDOR_SIGNATURES: Lazy<Vec<(BlockVendor, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            BlockVendor::Recaptcha,
            vec![
                build_signature(r"g-recaptcha"),
                build_signature(r"recaptcha/api\.js"),
            ],
        ),
        (
            BlockVendor::Hcaptcha,
            vec![
                build_signature(r"h-captcha"),
                build_signature(r"hcaptcha\.com/1/api\.js"),
            ],
        ),
        (
            BlockVendor::Turnstile,
            vec![
                build_signature(r"cf-turnstile"),
                build_signature(r"cf-turnstile-response"),
                build_signature(r"challenges\.cloudflare\.com/turnstile"),
            ],
        ),
    ]
});

fn build_signature(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid block signature regex `{pattern}`: {err}"))
}

/// Phrases that only indicate a block in combination (and with a blocking
/// status code).
static GENERIC_BLOCK_PHRASES: &[&str] = &[
    "please verify you are a human",
    "are you a robot",
    "access has been denied",
    "automation tools to browse the website",
];

const CLOUDFLARE_INTERSTITIAL: &str = "checking your browser before accessing";

const BLOCKING_STATUSES: &[u16] = &[403, 429, 503];

/// Classify one response into a block verdict.
///
/// First match wins, highest confidence kept:
/// 1. vendor widget/script signatures (0.95)
/// 2. Cloudflare interstitial phrase, or `server: cloudflare` with a
///    blocking status (0.9)
/// 3. two or more generic block phrases with a blocking status (0.8)
/// 4. a single weak signal (0.5) is logged as suspected but does not set
///    `present`
#[must_use]
pub fn classify(signals: PageSignals<'_>) -> BlockVerdict {
    let prefix_end = floor_char_boundary(signals.body, CLASSIFIER_PREFIX_BYTES);
    let haystack = signals.body[..prefix_end].to_lowercase();
    let url_lower = signals.final_url.to_lowercase();

    // Rule 1: vendor widgets.
    for (vendor, signatures) in VENDOR_SIGNATURES.iter() {
        for signature in signatures {
            if signature.is_match(&haystack) || signature.is_match(&url_lower) {
                return BlockVerdict {
                    present: true,
                    vendor: *vendor,
                    confidence: 0.95,
                    reason: format!("vendor signature: {}", signature.as_str()),
                };
            }
        }
    }

    let blocking_status = BLOCKING_STATUSES.contains(&signals.status);
    let cloudflare_server = signals
        .server
        .is_some_and(|s| s.to_lowercase().contains("cloudflare"));

    // Rule 2: Cloudflare interstitial.
    if haystack.contains(CLOUDFLARE_INTERSTITIAL) || (cloudflare_server && blocking_status) {
        return BlockVerdict {
            present: true,
            vendor: BlockVendor::CloudflareBlock,
            confidence: 0.9,
            reason: if cloudflare_server && blocking_status {
                format!("server: cloudflare with status {}", signals.status)
            } else {
                "cloudflare interstitial phrase".to_string()
            },
        };
    }

    // Rule 3: generic block needs at least two phrases AND a blocking status.
    let phrase_hits: Vec<&str> = GENERIC_BLOCK_PHRASES
        .iter()
        .copied()
        .filter(|p| haystack.contains(p))
        .collect();

    if phrase_hits.len() >= 2 && blocking_status {
        return BlockVerdict {
            present: true,
            vendor: BlockVendor::GenericBlock,
            confidence: 0.8,
            reason: format!("generic block phrases: {}", phrase_hits.join(", ")),
        };
    }

    // Rule 4: a lone weak signal is recorded but not acted on.
    if phrase_hits.len() == 1 {
        debug!(
            "Suspected block signal (not conclusive): {} [status {}]",
            phrase_hits[0], signals.status
        );
        return BlockVerdict {
            present: false,
            vendor: BlockVendor::None,
            confidence: 0.5,
            reason: format!("suspected: {}", phrase_hits[0]),
        };
    }

    BlockVerdict::clean()
}

/// Largest index `<= max` that sits on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
