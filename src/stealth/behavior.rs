//! Human behavior emulation over CDP input events.
//!
//! Mouse movement follows a curved path with variable step timing, scrolls
//! arrive in segments with reading-like pauses, and typing has per-key
//! delay jitter with occasional longer hesitations.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    MouseButton,
};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::time::Duration;

/// Move the mouse from `from` to `to` along a non-linear path.
///
/// Uses a quadratic curve with a randomly displaced control point and
/// 12-25 steps of uneven duration, which is what trajectory-based bot
/// detection expects from a human hand.
pub async fn humanize_mouse_move(
    page: &Page,
    from: (f64, f64),
    to: (f64, f64),
) -> Result<()> {
    let mut rng = SmallRng::from_os_rng();
    let steps = rng.random_range(12..=25);

    // Control point displaced perpendicular to the straight line.
    let mid_x = (from.0 + to.0) / 2.0 + rng.random_range(-120.0..=120.0);
    let mid_y = (from.1 + to.1) / 2.0 + rng.random_range(-80.0..=80.0);

    for step in 1..=steps {
        let t = step as f64 / steps as f64;
        let inv = 1.0 - t;
        let x = inv * inv * from.0 + 2.0 * inv * t * mid_x + t * t * to.0;
        let y = inv * inv * from.1 + 2.0 * inv * t * mid_y + t * t * to.1;

        page.execute(
            DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(x)
                .y(y)
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await
        .context("mouse move dispatch failed")?;

        // Ease in/out: slower near the endpoints.
        let edge = (t - 0.5).abs() * 2.0;
        let delay_ms = 8.0 + edge * 18.0 + rng.random_range(0.0..=6.0);
        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
    }

    Ok(())
}

/// Scroll down `total_px` in several segments with reading pauses.
pub async fn humanize_scroll(page: &Page, total_px: f64) -> Result<()> {
    let mut rng = SmallRng::from_os_rng();
    let mut remaining = total_px;
    let x = rng.random_range(200.0..=800.0);
    let y = rng.random_range(200.0..=500.0);

    while remaining > 0.0 {
        let segment = rng.random_range(180.0..=420.0_f64).min(remaining);
        page.execute(
            DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseWheel)
                .x(x)
                .y(y)
                .delta_x(0.0)
                .delta_y(segment)
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await
        .context("scroll dispatch failed")?;
        remaining -= segment;

        // Pause as if reading; occasionally a longer dwell.
        let pause_ms = if rng.random_bool(0.15) {
            rng.random_range(900..=2200)
        } else {
            rng.random_range(250..=700)
        };
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }

    Ok(())
}

/// Type `text` into the focused element with human key timing.
pub async fn humanize_typing(page: &Page, text: &str) -> Result<()> {
    let mut rng = SmallRng::from_os_rng();

    for ch in text.chars() {
        let key_text = ch.to_string();
        page.execute(
            DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .text(key_text.clone())
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await
        .context("key down dispatch failed")?;
        page.execute(
            DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await
        .context("key up dispatch failed")?;

        // Inter-key delay; rare longer hesitation as if thinking.
        let delay_ms = if rng.random_bool(0.04) {
            rng.random_range(350..=900)
        } else {
            rng.random_range(55..=160)
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}

/// Click at a point with a small position wobble and press-release delay.
pub async fn humanize_click(page: &Page, at: (f64, f64)) -> Result<()> {
    let mut rng = SmallRng::from_os_rng();
    let x = at.0 + rng.random_range(-2.0..=2.0);
    let y = at.1 + rng.random_range(-2.0..=2.0);

    page.execute(
        DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("mouse press dispatch failed")?;

    tokio::time::sleep(Duration::from_millis(rng.random_range(40..=120))).await;

    page.execute(
        DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("mouse release dispatch failed")?;

    Ok(())
}
