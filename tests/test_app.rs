mod common;
use common::*;

use pi30_bridge::coordinator::ChannelData;
use pi30_bridge::prelude::*;

use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn daemon_publishes_snapshots_until_shutdown() -> Result<()> {
    common_setup();

    let channels = Channels::new();
    let coordinator = Coordinator::new(Arc::new(Factory::healthy_link()));
    let mut telemetry = channels.telemetry.subscribe();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let app = tokio::spawn(pi30_bridge::start(
        shutdown_rx,
        Factory::config(),
        channels.clone(),
        coordinator.clone(),
    ));

    // the first tick fires straight away
    let data = tokio::time::timeout(Duration::from_secs(5), telemetry.recv()).await??;
    match data {
        ChannelData::Snapshot(snapshot) => {
            assert_eq!(snapshot.get("working_mode"), Some(&Value::from("Battery")));
        }
        other => panic!("expected a snapshot, got {:?}", other),
    }

    shutdown_tx.send(())?;
    tokio::time::timeout(Duration::from_secs(10), app).await???;

    assert!(coordinator.stats.lock().unwrap().cycles >= 1);

    Ok(())
}

#[tokio::test]
async fn silent_inverter_marks_data_unavailable() -> Result<()> {
    let channels = Channels::new();
    let coordinator = Coordinator::new(Arc::new(FakeLink::silent()));
    let mut telemetry = channels.telemetry.subscribe();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let app = tokio::spawn(pi30_bridge::start(
        shutdown_rx,
        Factory::config(),
        channels.clone(),
        coordinator,
    ));

    let data = tokio::time::timeout(Duration::from_secs(5), telemetry.recv()).await??;
    assert!(matches!(data, ChannelData::Unavailable(reason) if reason.contains("no response")));

    shutdown_tx.send(())?;
    tokio::time::timeout(Duration::from_secs(10), app).await???;

    Ok(())
}
