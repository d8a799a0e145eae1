use std::path::PathBuf;

use tilesync::{join, ClientConfig, Layer, PasteOrder, WorldEvent};
use tilesync_testkit::{
    empty_init, foreground_fragment, init_tracing, test_block, test_bootstrap, test_bootstrap_json,
    EchoOptions, EchoServer,
};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tilesync-smoke-{}-{name}", std::process::id()))
}

#[tokio::test(start_paused = true)]
async fn join_from_files_and_paste_round_trip() {
    init_tracing();
    let bootstrap_path = temp_path("bootstrap.json");
    let config_path = temp_path("client.toml");
    std::fs::write(&bootstrap_path, test_bootstrap_json()).expect("write bootstrap");

    let mut config = ClientConfig::default();
    config.paste_order = PasteOrder::RowMajor;
    config.scheduler.coalesce = false;
    config.save_to_path(&config_path).expect("write config");

    let bootstrap = test_bootstrap();
    let (transport, server) =
        EchoServer::spawn(bootstrap.clone(), empty_init(3, 2), EchoOptions::default());
    let session = join(transport, &bootstrap_path, &config_path)
        .await
        .expect("join");
    let mut events = session.subscribe();

    let fragment = foreground_fragment(
        &bootstrap,
        &[&["brick", "basic_white"], &["basic_black", "brick"], &["brick", "brick"]],
    );
    let batches = session.paste(0, 0, fragment.clone()).await.expect("paste");
    assert_eq!(batches.len(), 6, "one batch per cell");
    assert_eq!(batches[1][0].x, 1, "row before column");
    session.wait_idle().await.expect("drain");

    assert_eq!(session.snapshot().await.unwrap().grid, fragment);
    assert_eq!(server.placements().len(), 6);

    let mut changed = 0;
    while let Ok(event) = events.try_recv() {
        if let WorldEvent::BlockChanged { player_id, change } = event {
            assert_eq!(player_id, Some(tilesync_testkit::TEST_PLAYER_ID));
            assert_eq!(change.layer, Layer::Foreground);
            changed += 1;
        }
    }
    assert_eq!(changed, 6);

    // Clearing the region writes empties back.
    let blank = tilesync::Structure::new(3, 2).unwrap();
    session.fill(0, 0, blank.clone()).await.expect("fill");
    session.wait_idle().await.expect("drain");
    assert_eq!(session.copy(0, 0, 2, 1).await.unwrap(), blank);

    session.close().await;
    session.closed().await.expect("clean close");
    let _ = std::fs::remove_file(bootstrap_path);
    let _ = std::fs::remove_file(config_path);
}

#[tokio::test(start_paused = true)]
async fn missing_config_falls_back_to_defaults() {
    let bootstrap_path = temp_path("defaults-bootstrap.json");
    std::fs::write(&bootstrap_path, test_bootstrap_json()).expect("write bootstrap");

    let bootstrap = test_bootstrap();
    let (transport, server) =
        EchoServer::spawn(bootstrap.clone(), empty_init(2, 2), EchoOptions::default());
    let session = join(transport, &bootstrap_path, &temp_path("does-not-exist.toml"))
        .await
        .expect("join");

    let fragment = foreground_fragment(&bootstrap, &[&["brick", "brick"], &["brick", "brick"]]);
    session.paste(0, 0, fragment).await.expect("paste");
    session.wait_idle().await.expect("drain");
    // Defaults coalesce the whole square into a single message.
    assert_eq!(server.placements().len(), 1);
    assert_eq!(
        session.snapshot().await.unwrap().grid.get(Layer::Foreground, 1, 1),
        Some(&test_block(&bootstrap, "brick"))
    );
    let _ = std::fs::remove_file(bootstrap_path);
}

#[tokio::test]
async fn join_rejects_missing_bootstrap() {
    let (transport, _server) = tilesync::ChannelTransport::pair();
    let result = join(
        transport,
        &temp_path("missing-bootstrap.json"),
        &temp_path("missing.toml"),
    )
    .await;
    assert!(result.is_err());
}
