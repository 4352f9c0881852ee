//! Device profiles: the coherent fingerprint applied to a browser session.
//!
//! Every profile fixes user agent, platform, viewport, WebGL strings and
//! hardware hints together so the pieces can never contradict each other
//! (a macOS UA always reports `MacIntel` and an Apple/AMD renderer, never
//! SwiftShader). Selection is random for new sessions; persisted sessions
//! reuse their stored profile verbatim.

use rand::Rng;
use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Coherent browser fingerprint for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone_id: String,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub languages: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// OS family a profile template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OsFamily {
    Windows,
    Macos,
    Linux,
}

struct ProfileTemplate {
    os: OsFamily,
    user_agent: &'static str,
    platform: &'static str,
    webgl_vendor: &'static str,
    webgl_renderer: &'static str,
    hardware_concurrency: u32,
    device_memory: u32,
}

/// The profile pool. One entry is one internally consistent device;
/// renderer strings match real driver output for the platform.
static PROFILE_POOL: &[ProfileTemplate] = &[
    ProfileTemplate {
        os: OsFamily::Windows,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
        platform: "Win32",
        webgl_vendor: "Google Inc. (Intel)",
        webgl_renderer: "ANGLE (Intel, Intel(R) UHD Graphics 770 Direct3D11 vs_5_0 ps_5_0, D3D11)",
        hardware_concurrency: 12,
        device_memory: 16,
    },
    ProfileTemplate {
        os: OsFamily::Windows,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        platform: "Win32",
        webgl_vendor: "Google Inc. (NVIDIA)",
        webgl_renderer: "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)",
        hardware_concurrency: 16,
        device_memory: 32,
    },
    ProfileTemplate {
        os: OsFamily::Macos,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
        platform: "MacIntel",
        webgl_vendor: "Google Inc. (Apple)",
        webgl_renderer: "ANGLE (Apple, ANGLE Metal Renderer: Apple M2, Unspecified Version)",
        hardware_concurrency: 8,
        device_memory: 16,
    },
    ProfileTemplate {
        os: OsFamily::Macos,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        platform: "MacIntel",
        webgl_vendor: "Google Inc. (AMD)",
        webgl_renderer: "ANGLE (AMD, AMD Radeon Pro 5500M OpenGL Engine, OpenGL 4.1)",
        hardware_concurrency: 12,
        device_memory: 32,
    },
    ProfileTemplate {
        os: OsFamily::Linux,
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
        platform: "Linux x86_64",
        webgl_vendor: "Google Inc. (Intel)",
        webgl_renderer: "ANGLE (Intel, Mesa Intel(R) UHD Graphics 630 (CFL GT2), OpenGL 4.6)",
        hardware_concurrency: 8,
        device_memory: 16,
    },
];

/// Common desktop viewports; picked independently of the OS.
static VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (2560, 1440),
];

/// Region to locale/timezone. Unknown regions fall back to en-US/New York.
static REGION_TABLE: &[(&str, &str, &str, &[&str])] = &[
    ("us", "en-US", "America/New_York", &["en-US", "en"]),
    ("gb", "en-GB", "Europe/London", &["en-GB", "en"]),
    ("de", "de-DE", "Europe/Berlin", &["de-DE", "de", "en"]),
    ("fr", "fr-FR", "Europe/Paris", &["fr-FR", "fr", "en"]),
    ("jp", "ja-JP", "Asia/Tokyo", &["ja-JP", "ja", "en"]),
    ("br", "pt-BR", "America/Sao_Paulo", &["pt-BR", "pt", "en"]),
    ("in", "en-IN", "Asia/Kolkata", &["en-IN", "en", "hi"]),
];

/// Generate a fresh profile.
///
/// `region` (typically the proxy exit region) steers locale and timezone;
/// the hardware identity is drawn from the pool.
#[must_use]
pub fn generate_profile(region: Option<&str>) -> DeviceProfile {
    let mut rng = rand::rng();
    let template = PROFILE_POOL
        .choose(&mut rng)
        .unwrap_or(&PROFILE_POOL[0]);
    let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap_or(&VIEWPORTS[0]);

    let region_key = region.map(str::to_lowercase);
    let (region_code, locale, timezone, languages) = REGION_TABLE
        .iter()
        .find(|(code, ..)| Some(*code) == region_key.as_deref())
        .copied()
        .unwrap_or(REGION_TABLE[0]);

    // Small jitter on hardware hints, staying on values real devices report.
    let concurrency_options = [
        template.hardware_concurrency,
        template.hardware_concurrency,
        template.hardware_concurrency / 2,
    ];
    let hardware_concurrency = *concurrency_options
        .choose(&mut rng)
        .unwrap_or(&template.hardware_concurrency);

    DeviceProfile {
        user_agent: template.user_agent.to_string(),
        viewport_width: width,
        viewport_height: height,
        locale: locale.to_string(),
        timezone_id: timezone.to_string(),
        webgl_vendor: template.webgl_vendor.to_string(),
        webgl_renderer: template.webgl_renderer.to_string(),
        platform: template.platform.to_string(),
        hardware_concurrency: hardware_concurrency.max(2),
        device_memory: template.device_memory,
        languages: languages.iter().map(ToString::to_string).collect(),
        region: region.map(|_| region_code.to_string()),
    }
}

/// Fresh 16-byte session seed as hex.
///
/// Drives the canvas/audio perturbations: stable within a session,
/// different across sessions.
#[must_use]
pub fn generate_session_seed() -> String {
    let seed: Vec<u8> = (0..16).map(|_| rand::rng().random::<u8>()).collect();
    hex::encode(seed)
}

/// Whether the pieces of a profile belong to the same OS story.
#[must_use]
pub fn is_coherent(profile: &DeviceProfile) -> bool {
    let ua = profile.user_agent.as_str();
    let os = if ua.contains("Windows NT") {
        OsFamily::Windows
    } else if ua.contains("Mac OS X") {
        OsFamily::Macos
    } else {
        OsFamily::Linux
    };

    let platform_ok = match os {
        OsFamily::Windows => profile.platform == "Win32",
        OsFamily::Macos => profile.platform == "MacIntel",
        OsFamily::Linux => profile.platform.starts_with("Linux"),
    };

    let renderer = profile.webgl_renderer.as_str();
    let renderer_ok = !renderer.contains("SwiftShader")
        && match os {
            OsFamily::Macos => renderer.contains("Apple") || renderer.contains("AMD"),
            OsFamily::Windows => renderer.contains("Direct3D") || renderer.contains("D3D11"),
            OsFamily::Linux => renderer.contains("Mesa") || renderer.contains("OpenGL"),
        };

    platform_ok && renderer_ok
}
