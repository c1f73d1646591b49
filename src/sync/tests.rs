//! Engine scenarios against the recording console driver

use super::*;
use crate::config::{FieldConfig, FieldType};
use crate::drivers::console::{known, DriverCall};
use crate::drivers::{ConsoleDriver, FieldBatch};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

const CONFIG: &str = r#"
vmix:
  host: 127.0.0.1
  port: 8088
  input_order: [score, alt]
  inputs:
    score:
      display_name: Score bug
      external_key: score-target
      fields:
        TeamA: { data_map_key: teamA.name }
        ScoreA: { data_map_key: currentSet.scoreA }
    alt:
      display_name: Alternate bug
      external_number: 13
      fields:
        Sponsor: { custom_value: ACME }
"#;

fn driver() -> ConsoleDriver {
    ConsoleDriver::new("test").with_inputs(vec![
        known("1", "black-key", "Black"),
        known("13", "score-target", "Scoreboard.gtzip"),
    ])
}

fn engine_with(driver: &ConsoleDriver, yaml: &str) -> SyncEngine {
    let store = ConfigStore::in_memory(AppConfig::from_yaml(yaml).unwrap());
    SyncEngine::new(store, Arc::new(driver.clone()), None)
}

fn score_snapshot(name: &str, score: i64) -> MatchSnapshot {
    MatchSnapshot::new(json!({
        "matchId": "m1",
        "teamA": { "name": name },
        "currentSet": { "scoreA": score }
    }))
}

fn pushes_to(driver: &ConsoleDriver, target: &str) -> Vec<FieldBatch> {
    driver
        .pushes()
        .into_iter()
        .filter(|(t, _)| t == target)
        .map(|(_, batch)| batch)
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(350)).await;
}

fn png(color: [u8; 3]) -> String {
    let img = image::RgbImage::from_pixel(1, 1, image::Rgb(color));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    STANDARD.encode(bytes)
}

/// Score input only, plus an image field for team A's logo
fn logo_engine(driver: &ConsoleDriver, dir: &TempDir) -> SyncEngine {
    let yaml = format!(
        "{}        LogoA: {{ data_map_key: teamA.logoPath, vmix_field_type: image }}\n",
        CONFIG
            .split("    alt:")
            .next()
            .unwrap()
            .replace("[score, alt]", "[score]")
    );
    let store = ConfigStore::in_memory(AppConfig::from_yaml(&yaml).unwrap());
    SyncEngine::new(
        store,
        Arc::new(driver.clone()),
        Some(LogoStore::new(dir.path().join("logos"))),
    )
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_single_push_after_debounce() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    assert!(engine.connect("127.0.0.1", 8088).await.success);

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    tokio::time::sleep(Duration::from_millis(299)).await;
    assert!(driver.pushes().is_empty());

    settle().await;
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);

    let mut expected = FieldBatch::default();
    expected.text.insert("TeamA".into(), "Alpha".into());
    expected.text.insert("ScoreA".into(), "10".into());
    assert_eq!(pushes[0], expected);
}

#[tokio::test(start_paused = true)]
async fn test_burst_collapses_to_last_snapshot() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    for score in 0..20 {
        engine.update_match_data(score_snapshot("Alpha", score), false);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    settle().await;

    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].text["ScoreA"], "19");
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_snapshot_sends_nothing_until_forced() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    assert!(driver.pushes().is_empty());

    let input = engine.store().input("score").unwrap();
    let changed =
        engine
            .pipeline()
            .changed_fields(&input, "score-target", &score_snapshot("Alpha", 10), false);
    assert!(changed.is_empty());

    engine.update_match_data(score_snapshot("Alpha", 10), true);
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].len(), 2);
    assert_eq!(pushes_to(&driver, "13")[0].text["Sponsor"], "ACME");
}

#[tokio::test(start_paused = true)]
async fn test_only_changed_fields_are_sent() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    engine.update_match_data(score_snapshot("Alpha", 11), false);
    settle().await;
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].text.len(), 1);
    assert_eq!(pushes[0].text["ScoreA"], "11");
}

#[tokio::test(start_paused = true)]
async fn test_failed_push_leaves_cache_for_retry() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    driver.set_fail_pushes(true);
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    assert_eq!(
        engine.pipeline().cached(FieldType::Text, "score-target", "TeamA"),
        None
    );

    driver.set_fail_pushes(false);
    driver.clear_calls();
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].len(), 2);
    assert_eq!(
        engine
            .pipeline()
            .cached(FieldType::Text, "score-target", "TeamA")
            .as_deref(),
        Some("Alpha")
    );
}

#[tokio::test(start_paused = true)]
async fn test_updates_during_push_are_coalesced() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;
    driver.set_push_delay(Some(Duration::from_secs(1)));

    engine.update_match_data(score_snapshot("Alpha", 1), false);
    // First push starts at 300ms and holds until 1300ms
    tokio::time::sleep(Duration::from_millis(400)).await;
    for score in 2..=4 {
        engine.update_match_data(score_snapshot("Alpha", score), false);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(pushes_to(&driver, "score-target").len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].text["ScoreA"], "4");
}

#[tokio::test(start_paused = true)]
async fn test_match_change_forces_full_resend() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    let next_match = MatchSnapshot::new(json!({
        "matchId": "m2",
        "teamA": { "name": "Alpha" },
        "currentSet": { "scoreA": 10 }
    }));
    engine.update_match_data(next_match, false);
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_engine_never_pushes_and_catches_up_on_connect() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    assert!(driver.pushes().is_empty());

    engine.connect("127.0.0.1", 8088).await;
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target").len(), 1);

    engine.update_match_data(score_snapshot("Alpha", 12), false);
    engine.disconnect().await;
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target").len(), 1);
    assert!(!engine.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn test_push_in_flight_during_disconnect_is_discarded() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;
    driver.set_push_delay(Some(Duration::from_millis(500)));

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.disconnect().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        engine.pipeline().cached(FieldType::Text, "score-target", "TeamA"),
        None
    );
}

#[tokio::test]
async fn test_shared_number_overlay_attribution() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    // score (key) and alt (number 13) both resolve to input 13
    assert!(engine.show_overlay("alt").await.success);
    assert!(engine.poller().tick().await);

    assert!(engine.is_overlay_active("alt"));
    assert!(!engine.is_overlay_active("score"));
    assert!(engine.is_another_overlay_on_air_for_same_input("score"));
    assert!(!engine.is_another_overlay_on_air_for_same_input("alt"));

    assert!(engine.show_overlay("score").await.success);
    engine.poller().tick().await;
    assert!(engine.is_overlay_active("score"));
    assert!(!engine.is_overlay_active("alt"));

    assert!(engine.hide_overlay("score").await.success);
    engine.poller().tick().await;
    assert!(!engine.is_overlay_active("score"));
    assert!(!engine.is_another_overlay_on_air_for_same_input("alt"));
}

#[tokio::test]
async fn test_overlay_taken_by_vmix_operator() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    assert!(engine.show_overlay("score").await.success);
    engine.poller().tick().await;
    assert!(engine.is_overlay_active("score"));

    // Someone switched layer 1 to another input inside vMix
    driver.set_layer(1, Some("1"));
    engine.poller().tick().await;
    assert!(!engine.is_overlay_active("score"));
    assert!(!engine.overlay_status("alt").another_on_air);
}

#[tokio::test]
async fn test_overlay_errors_are_returned_not_raised() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);

    let result = engine.show_overlay("score").await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not connected"));

    engine.connect("127.0.0.1", 8088).await;
    let result = engine.show_overlay("ghost").await;
    assert_eq!(result.error.as_deref(), Some("configuration: unknown input 'ghost'"));

    engine.disconnect().await;
    assert!(engine.poller().current().overlays.is_empty());
    assert!(!engine.is_overlay_active("score"));
}

#[tokio::test(start_paused = true)]
async fn test_remap_resends_under_new_target() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    let result = engine
        .remap(
            "score",
            RemapTarget {
                key: Some("new-target".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(result.success);
    settle().await;

    let pushes = pushes_to(&driver, "new-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].len(), 2);
    assert_eq!(
        engine.pipeline().cached(FieldType::Text, "score-target", "TeamA"),
        None
    );

    // Remapping back must not be suppressed by anything cached before
    driver.clear_calls();
    engine
        .remap("score", RemapTarget::from(&known("13", "score-target", "Scoreboard.gtzip")))
        .await;
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].len(), 2);
    assert_eq!(
        engine.store().input("score").unwrap().external_number.as_deref(),
        Some("13")
    );
}

#[tokio::test]
async fn test_remap_rejects_unknown_and_empty() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    assert!(!engine.remap("ghost", RemapTarget::from(&known("1", "k", "t"))).await.success);
    assert!(!engine.remap("score", RemapTarget::default()).await.success);
}

#[tokio::test(start_paused = true)]
async fn test_settings_save_forces_resync() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    let mut config = engine.store().snapshot();
    config
        .vmix
        .inputs
        .get_mut("score")
        .unwrap()
        .fields
        .insert("ColorA".into(), FieldConfig::data("teamA.color", FieldType::Color));
    engine.on_settings_saved(config);
    settle().await;

    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].text.len(), 2);
    // Missing team color falls back to the configured default
    assert_eq!(pushes[0].color["ColorA"], "#0047AB");
}

#[tokio::test(start_paused = true)]
async fn test_disabled_inputs_are_skipped() {
    let driver = driver();
    let yaml = CONFIG.replace("      external_number: 13", "      external_number: 13\n      enabled: false");
    let engine = engine_with(&driver, &yaml);
    engine.connect("127.0.0.1", 8088).await;

    engine.update_match_data(score_snapshot("Alpha", 10), true);
    settle().await;
    assert!(pushes_to(&driver, "13").is_empty());
    assert_eq!(pushes_to(&driver, "score-target").len(), 1);
    assert!(!engine.show_overlay("alt").await.success);
}

#[tokio::test(start_paused = true)]
async fn test_logo_swap_rederives_files_and_resends_images() {
    let dir = TempDir::new().unwrap();
    let driver = driver();
    let engine = logo_engine(&driver, &dir);
    engine.connect("127.0.0.1", 8088).await;

    let (red, blue) = (png([255, 0, 0]), png([0, 0, 255]));

    let path_a = engine.save_logo(&red, Side::A).await.unwrap();
    engine.update_match_data(
        MatchSnapshot::new(json!({ "teamA": { "name": "Alpha", "logoPath": path_a } })),
        false,
    );
    settle().await;
    driver.clear_calls();

    let swapped = engine
        .on_teams_swapped(json!({
            "teamA": { "name": "Beta", "logoBase64": blue },
            "teamB": { "name": "Alpha", "logoBase64": red }
        }))
        .await
        .unwrap();
    settle().await;

    let new_path_a = swapped.text("teamA.logoPath");
    assert!(new_path_a.starts_with("logos/logo_A_"));
    let file = dir.path().join(&new_path_a);
    assert_eq!(std::fs::read(file).unwrap(), STANDARD.decode(&blue).unwrap());

    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].image["LogoA"], new_path_a);
    assert_eq!(pushes[0].text["TeamA"], "Beta");
}

#[tokio::test]
async fn test_list_known_inputs_requires_connection() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    assert!(engine.list_known_inputs().await.is_err());

    engine.connect("127.0.0.1", 8088).await;
    let inputs = engine.list_known_inputs().await.unwrap();
    assert_eq!(inputs.len(), 2);
    assert!(driver.calls().contains(&DriverCall::ListInputs));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_keeps_current_session_pushing() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("127.0.0.1", 8088).await;
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    driver.clear_calls();

    driver.set_connect_delay(Some(Duration::from_secs(2)));
    driver.set_refuse_connects(true);
    let attempt = tokio::spawn({
        let engine = engine.clone();
        async move { engine.connect("10.9.9.9", 8088).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.connection().is_connecting());
    assert!(engine.connection().is_connected());
    assert!(engine.connection_status().connected);

    // Queued mid-handshake, pushed to the session still in force
    engine.update_match_data(score_snapshot("Alpha", 11), false);
    settle().await;
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].text["ScoreA"], "11");

    let result = attempt.await.unwrap();
    assert!(!result.success);
    assert!(engine.connection().is_connected());
    assert!(!engine.connection().is_connecting());
    assert_eq!(engine.store().read(|c| c.vmix.host.clone()), "127.0.0.1");

    driver.clear_calls();
    engine.update_match_data(score_snapshot("Alpha", 12), false);
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].text["ScoreA"], "12");
}

#[tokio::test(start_paused = true)]
async fn test_connecting_to_another_host_resends_everything() {
    let driver = driver();
    let engine = engine_with(&driver, CONFIG);
    engine.connect("10.0.0.1", 8088).await;
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;

    // Same machine again: the cache still holds, nothing to send
    engine.disconnect().await;
    driver.clear_calls();
    assert!(engine.connect("10.0.0.1", 8088).await.success);
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    assert!(driver.pushes().is_empty());

    engine.disconnect().await;
    assert!(engine.connect("10.0.0.2", 8088).await.success);
    engine.update_match_data(score_snapshot("Alpha", 10), false);
    settle().await;
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].len(), 2);
    assert_eq!(pushes_to(&driver, "13")[0].text["Sponsor"], "ACME");

    // Switching machines without a disconnect in between
    driver.clear_calls();
    assert!(engine.connect("10.0.0.3", 8088).await.success);
    settle().await;
    assert_eq!(pushes_to(&driver, "score-target")[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_load_match_rewrites_and_recovers_logos() {
    let dir = TempDir::new().unwrap();
    let driver = driver();
    let engine = logo_engine(&driver, &dir);
    engine.connect("127.0.0.1", 8088).await;
    let red = png([255, 0, 0]);

    let loaded = engine
        .load_match(json!({ "teamA": { "name": "Alpha", "logoBase64": red } }), false)
        .await
        .unwrap();
    settle().await;

    let path = loaded.text("teamA.logoPath");
    assert!(path.starts_with("logos/logo_A_"));
    assert_eq!(
        std::fs::read(dir.path().join(&path)).unwrap(),
        STANDARD.decode(&red).unwrap()
    );
    let pushes = pushes_to(&driver, "score-target");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].image["LogoA"], path);

    // Legacy record without a payload: derived from the file on disk
    let legacy = engine
        .load_match(json!({ "teamA": { "name": "Alpha" }, "teamB": { "name": "Beta" } }), false)
        .await
        .unwrap();
    assert_eq!(legacy.text("teamA.logoBase64"), red);
    assert_eq!(legacy.text("teamA.logoPath"), path);
    assert_eq!(legacy.get("teamB.logoPath"), None);
}

#[tokio::test]
async fn test_list_inputs_once_leaves_engine_state_alone() {
    let driver = driver();
    let config = AppConfig::from_yaml(CONFIG).unwrap();

    let inputs = list_inputs_once(Arc::new(driver.clone()), &config).await.unwrap();
    assert_eq!(inputs.len(), 2);
    assert_eq!(
        driver.calls(),
        vec![
            DriverCall::Connect(crate::drivers::Endpoint::new("127.0.0.1", 8088)),
            DriverCall::ListInputs,
            DriverCall::Disconnect,
        ]
    );

    driver.set_reachable(false);
    assert!(list_inputs_once(Arc::new(driver.clone()), &config).await.is_err());
}
