use std::io::Write;
use std::time::Duration;

use qguardarr_config::ConfigLoader;

fn write_config(path: &std::path::Path, rollout_percentage: u8) {
    let mut file = std::fs::File::create(path).expect("create config file");
    write!(
        file,
        r#"
[global]
rollout_percentage = {rollout_percentage}

[qbittorrent]
username = "admin"
password = "hunter2"

[[trackers]]
id = "tracker-a"
name = "Tracker A"
pattern = "tracker-a\\.example"
max_upload_speed = 10485760

[[trackers]]
id = "catch-all"
name = "Catch All"
pattern = ".*"
max_upload_speed = 5242880
"#
    )
    .expect("write config file");
}

#[tokio::test]
async fn watch_applies_valid_reload_and_skips_invalid_one() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("qguardarr.toml");
    write_config(&path, 10);

    let loader = ConfigLoader::new(&path);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watch_handle = tokio::spawn(qguardarr_config::watch(
        loader,
        Duration::from_millis(20),
        move |config| {
            let _ = tx.send(config);
        },
    ));

    // Bump the rollout percentage; the watcher should pick it up.
    tokio::time::sleep(Duration::from_millis(40)).await;
    write_config(&path, 25);

    let updated = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("watcher should observe the updated file")
        .expect("channel should not close");
    assert_eq!(updated.global.rollout_percentage, 25);

    // An invalid rewrite (rollout_percentage out of range) must not be applied;
    // the channel should not receive a snapshot carrying the bad value.
    write_config(&path, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    watch_handle.abort();
}
