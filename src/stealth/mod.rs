//! Stealth layer: fingerprint masking, device-profile consistency and
//! session persistence for browser contexts.
//!
//! All patches run as init scripts injected before any page script. The
//! profile config object is injected first, then the evasion scripts in
//! dependency order, then the UA/locale/timezone/viewport overrides via
//! CDP. Level `minimal` covers the navigator surface; `moderate` adds the
//! fingerprint and WebRTC patches plus behavior emulation; `aggressive`
//! additionally throttles the network to a named profile.

pub mod behavior;
pub mod network;
pub mod profiles;
pub mod session;

pub use profiles::{DeviceProfile, generate_profile, generate_session_seed, is_coherent};
pub use session::{Session, SessionStore, StorageState, StoredCookie, StoredOrigin};

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp;
use tracing::{debug, warn};

use crate::config::StealthLevel;

/// Evasion scripts embedded at compile time.
///
/// Order matters: navigator basics first, fingerprint patches after.
const MINIMAL_SCRIPTS: &[(&str, &str)] = &[
    ("navigator", include_str!("scripts/navigator.js")),
    ("permissions", include_str!("scripts/permissions.js")),
];

const MODERATE_SCRIPTS: &[(&str, &str)] = &[
    ("webgl", include_str!("scripts/webgl.js")),
    ("canvas_noise", include_str!("scripts/canvas_noise.js")),
    ("audio_noise", include_str!("scripts/audio_noise.js")),
    ("webrtc", include_str!("scripts/webrtc.js")),
];

/// Inject the stealth bundle into a fresh page.
///
/// Must run before navigation; `AddScriptToEvaluateOnNewDocument`
/// guarantees the scripts execute ahead of any site code on every
/// subsequent document in this page.
pub async fn inject(page: &Page, session: &Session, level: StealthLevel) -> Result<()> {
    let profile = &session.profile;
    debug!(session_id = %session.session_id, ?level, "Injecting stealth bundle");

    // Step 1: profile config object, consumed by every evasion script.
    let fp_config = format!(
        r#"window.__fpConfig = {{
            platform: {platform},
            languages: {languages},
            hardwareConcurrency: {hardware_concurrency},
            deviceMemory: {device_memory},
            webglVendor: {webgl_vendor},
            webglRenderer: {webgl_renderer},
            screenWidth: {width},
            screenHeight: {height},
            sessionSeed: {seed}
        }};"#,
        platform = serde_json::to_string(&profile.platform)?,
        languages = serde_json::to_string(&profile.languages)?,
        hardware_concurrency = profile.hardware_concurrency,
        device_memory = profile.device_memory,
        webgl_vendor = serde_json::to_string(&profile.webgl_vendor)?,
        webgl_renderer = serde_json::to_string(&profile.webgl_renderer)?,
        width = profile.viewport_width,
        height = profile.viewport_height,
        seed = serde_json::to_string(&session.seed)?,
    );
    add_init_script(page, "fp_config", &fp_config).await?;

    // Step 2: evasion scripts for the active level. Best effort per
    // script; fail only when nothing at all could be injected.
    let mut scripts: Vec<(&str, &str)> = MINIMAL_SCRIPTS.to_vec();
    if level >= StealthLevel::Moderate {
        scripts.extend_from_slice(MODERATE_SCRIPTS);
    }

    let mut injected = 0usize;
    for (name, source) in &scripts {
        match add_init_script(page, name, source).await {
            Ok(()) => injected += 1,
            Err(e) => warn!("Failed to inject {name}: {e:#}"),
        }
    }
    if injected == 0 {
        anyhow::bail!("Failed to inject any stealth scripts");
    }

    // Step 3: UA / locale / timezone / viewport overrides from the profile.
    page.execute(cdp::browser_protocol::network::SetUserAgentOverrideParams {
        user_agent: profile.user_agent.clone(),
        accept_language: Some(accept_language_for(&profile.languages)),
        platform: Some(profile.platform.clone()),
        user_agent_metadata: None,
    })
    .await
    .context("Failed to override user agent")?;

    page.execute(
        cdp::browser_protocol::emulation::SetTimezoneOverrideParams::builder()
            .timezone_id(profile.timezone_id.clone())
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("Failed to override timezone")?;

    page.execute(cdp::browser_protocol::emulation::SetLocaleOverrideParams {
        locale: Some(profile.locale.clone()),
    })
    .await
    .context("Failed to override locale")?;

    page.execute(
        cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(profile.viewport_width))
            .height(i64::from(profile.viewport_height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("Failed to set viewport dimensions")?;

    debug!(
        "Stealth bundle active: {}/{} scripts",
        injected,
        scripts.len()
    );
    Ok(())
}

async fn add_init_script(page: &Page, name: &str, source: &str) -> Result<()> {
    page.execute(
        cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams {
            source: source.to_string(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        },
    )
    .await
    .with_context(|| format!("AddScriptToEvaluateOnNewDocument failed for {name}"))?;
    Ok(())
}

/// Build an Accept-Language header value from the profile's language list.
fn accept_language_for(languages: &[String]) -> String {
    let mut parts = Vec::with_capacity(languages.len());
    for (i, lang) in languages.iter().enumerate() {
        if i == 0 {
            parts.push(lang.clone());
        } else {
            let q = 1.0 - 0.1 * i as f64;
            parts.push(format!("{lang};q={q:.1}"));
        }
    }
    if parts.is_empty() {
        "en-US,en;q=0.9".to_string()
    } else {
        parts.join(",")
    }
}
