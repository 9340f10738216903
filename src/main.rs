use pi30_bridge::prelude::*;

use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let config = Config::new(options.config_file.clone()).unwrap_or_else(|err| {
        pi30_bridge::init_logging("info");
        error!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });

    pi30_bridge::init_logging(&config.loglevel);
    config.log_summary();
    let config = ConfigWrapper::from_config(config);

    if options.check {
        if let Err(err) = pi30_bridge::check(config).await {
            error!("{}", err);
            std::process::exit(1);
        }
        return Ok(());
    }

    if options.once {
        let snapshot = pi30_bridge::once(config).await.unwrap_or_else(|err| {
            error!("{}", err);
            std::process::exit(1);
        });
        println!("{}", snapshot.to_json()?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    if let Some(runtime) = options.runtime {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(runtime)).await;
            info!("runtime limit of {}s reached", runtime);
            let _ = shutdown_tx.send(());
        });
    }

    pi30_bridge::app(shutdown_rx, config).await
}
