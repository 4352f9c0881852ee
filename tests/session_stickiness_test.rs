//! Session stickiness and device-profile coherence across reloads.

use dragnet::stealth::{SessionStore, is_coherent};

#[tokio::test]
async fn reloaded_session_presents_identical_fingerprint() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first = {
        let store = SessionStore::new(dir.path().to_path_buf());
        store.load_or_create("sticky", None).await.expect("create")
    };

    // Fresh store instance, as a second process would see it.
    let second = {
        let store = SessionStore::new(dir.path().to_path_buf());
        store.load_or_create("sticky", None).await.expect("reload")
    };

    assert_eq!(first.profile.user_agent, second.profile.user_agent);
    assert_eq!(first.profile.viewport_width, second.profile.viewport_width);
    assert_eq!(first.profile.viewport_height, second.profile.viewport_height);
    assert_eq!(first.profile.locale, second.profile.locale);
    assert_eq!(first.profile.timezone_id, second.profile.timezone_id);
    assert_eq!(first.profile.webgl_vendor, second.profile.webgl_vendor);
    assert_eq!(first.profile.webgl_renderer, second.profile.webgl_renderer);
    assert_eq!(first.seed, second.seed);
}

#[tokio::test]
async fn fresh_sessions_diverge_in_seed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().to_path_buf());

    let a = store.load_or_create("one", None).await.expect("create one");
    let b = store.load_or_create("two", None).await.expect("create two");

    // The canvas/audio perturbations key off the seed, so distinct seeds
    // mean distinct fingerprint noise across sessions.
    assert_ne!(a.seed, b.seed);
}

#[tokio::test]
async fn stored_profiles_are_os_coherent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path().to_path_buf());

    for i in 0..20 {
        let session = store
            .load_or_create(&format!("coherent-{i}"), Some("gb"))
            .await
            .expect("create");
        assert!(
            is_coherent(&session.profile),
            "incoherent stored profile: {:?}",
            session.profile
        );
        assert_eq!(session.profile.locale, "en-GB");
        assert_eq!(session.profile.timezone_id, "Europe/London");
    }
}
