//! Chat bridge executable
//!
//! Keeps the messaging session alive, routes chats to the configured workflow
//! engine and picks up alerts and engine callbacks from the spool directory.

mod spool;

use bridge_core::{
    BridgeConfig, BroadcastEngine, FileDeviceStore, FlowiseClient, GatewayTransport,
    JsonDirectory, MessageRouter, N8nClient, SessionManager, SessionState,
};
use clap::{Arg, Command};
use spool::{BoxError, SpoolDirs, SpoolDispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the supervisor checks on the session
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("bridge-server")
        .version("1.0.0")
        .about("Chat bridge between the messaging network and workflow engines")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/app/config/bridge.json"),
        )
        .arg(
            Arg::new("spool-dir")
                .long("spool-dir")
                .value_name("DIR")
                .help("Directory watched for alerts and workflow callbacks (default: <data_dir>/spool)"),
        )
        .arg(
            Arg::new("logout")
                .long("logout")
                .help("Unlink the paired device and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .ok_or("missing --config")?;
    let config = BridgeConfig::from_file(config_path)?;
    log::info!("Loaded configuration from {}", config_path);

    let transport = Arc::new(GatewayTransport::new(config.gateway.clone())?);
    let device_store = Arc::new(FileDeviceStore::new(config.storage.device_path())?);
    let session = Arc::new(SessionManager::new(
        transport,
        device_store,
        config.session.clone(),
    ));

    if matches.get_flag("logout") {
        return logout(&session).await;
    }

    let directory = Arc::new(JsonDirectory::open(config.storage.directory_path())?);

    let mut router = MessageRouter::new(
        directory.clone(),
        directory.clone(),
        session.clone(),
        config.routing.clone(),
    );
    if let Some(n8n) = config.n8n.clone() {
        log::info!("n8n workflow enabled at {}", n8n.webhook_url);
        router = router.with_client(Arc::new(N8nClient::new(n8n)?));
    }
    if let Some(flowise) = config.flowise.clone() {
        log::info!("Flowise workflow enabled for flow {}", flowise.flow_id);
        router = router.with_client(Arc::new(FlowiseClient::new(flowise)?));
    }
    let router = Arc::new(router);

    let broadcast = Arc::new(BroadcastEngine::new(
        directory,
        session.clone(),
        config.routing.lookup_timeout(),
    ));

    log::info!("Initialized all services");

    session.start().await?;
    report_pairing(&session);

    let cancel = CancellationToken::new();

    let router_handle = {
        let router = router.clone();
        let inbound = session.subscribe();
        tokio::spawn(async move { router.run(inbound).await })
    };

    let supervisor_handle = tokio::spawn(supervise_session(session.clone(), cancel.clone()));

    let spool_root = matches
        .get_one::<String>("spool-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.storage.data_dir.join("spool"));
    let spool_dirs = SpoolDirs::create(&spool_root)?;
    let dispatcher = Arc::new(SpoolDispatcher::new(router, broadcast));
    let mut monitor_handle = tokio::spawn(spool::monitor(dispatcher, spool_dirs, cancel.clone()));

    let monitor_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown requested");
            false
        }
        result = &mut monitor_handle => {
            match result {
                Ok(Ok(())) => log::info!("Spool monitor exited"),
                Ok(Err(e)) => log::error!("Spool monitor failed: {}", e),
                Err(e) => log::error!("Spool monitor task panicked: {}", e),
            }
            true
        }
    };

    cancel.cancel();
    session.stop().await?;

    for (name, handle) in [("router", router_handle), ("supervisor", supervisor_handle)] {
        if let Err(e) = handle.await {
            log::error!("{} task panicked: {}", name, e);
        }
    }
    if !monitor_finished {
        match monitor_handle.await {
            Ok(Err(e)) => log::error!("Spool monitor failed: {}", e),
            Err(e) => log::error!("Spool monitor task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Bridge stopped");
    Ok(())
}

async fn logout(session: &SessionManager) -> Result<(), BoxError> {
    session.start().await?;

    if session.state() != SessionState::Connected {
        session.stop().await?;
        return Err("no paired device to log out".into());
    }

    session.logout().await?;
    session.stop().await?;
    log::info!("Device unlinked");
    Ok(())
}

fn report_pairing(session: &SessionManager) {
    if let Ok(code) = session.pairing_code() {
        log::info!("Pairing code: {} (Linked devices > Link with phone number)", code);
    }
}

/// Log new pairing codes and reconnect after the session drops
async fn supervise_session(session: Arc<SessionManager>, cancel: CancellationToken) {
    let mut last_code: Option<String> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SUPERVISE_INTERVAL) => {}
        }

        let status = session.status();
        match status.state {
            SessionState::AwaitingPairing => {
                if status.pairing_code.is_some() && status.pairing_code != last_code {
                    report_pairing(&session);
                    last_code = status.pairing_code;
                }
            }
            SessionState::Connected => {
                last_code = None;
            }
            SessionState::Disconnected => {
                log::warn!("Session is disconnected, reconnecting");
                if let Err(e) = session.start().await {
                    log::error!("Reconnect failed: {}", e);
                }
            }
        }
    }
}
