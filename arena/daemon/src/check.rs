//! Launcher Checks
//!
//! `arena-daemon check` verifies that the model backend is reachable and,
//! given a server URL, waits for an arena server to report healthy.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use arena_core::{ArenaConfig, ChatBackend, OllamaBackend};

use crate::CheckError;

/// Delay between health probes
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Run every check and print a line per result
pub async fn run(
    config: &ArenaConfig,
    server_url: Option<&str>,
    timeout: Duration,
) -> Result<(), CheckError> {
    let backend_config = config.backend_config();
    let backend = OllamaBackend::new(&backend_config);
    let backend_url = backend.base_url();

    if !backend.health_check().await {
        println!("error: Ollama is not running at {backend_url}");
        println!("       start it with: ollama serve");
        return Err(CheckError::BackendUnreachable { url: backend_url });
    }
    println!("ok: Ollama is running at {backend_url}");

    match backend.list_models().await {
        Ok(models) if models.is_empty() => {
            println!("warning: no models installed (try: ollama pull llama3.2)");
        }
        Ok(models) => {
            let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            println!("ok: {} model(s) available: {}", names.len(), names.join(", "));
        }
        Err(e) => println!("warning: could not list models: {e:#}"),
    }

    if let Some(url) = server_url {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CheckError::Client(e.to_string()))?;
        wait_for_server(&client, url, timeout).await?;
        println!("ok: arena server is healthy at {url}");
    }

    Ok(())
}

/// Poll `{url}/health` until it reports healthy or `timeout` elapses
pub async fn wait_for_server(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<(), CheckError> {
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let deadline = Instant::now() + timeout;
    let mut ticker = interval(PROBE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match probe(client, &health_url).await {
            Ok(()) => return Ok(()),
            Err(reason) => debug!(url = %health_url, %reason, "Server not ready"),
        }

        if Instant::now() >= deadline {
            return Err(CheckError::ServerNotReady {
                url: url.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }
    }
}

async fn probe(client: &reqwest::Client, health_url: &str) -> Result<(), String> {
    let response = client
        .get(health_url)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let body: Value = response.json().await.map_err(|e| e.to_string())?;
    match body.get("status").and_then(Value::as_str) {
        Some("healthy") => Ok(()),
        other => Err(format!("unexpected status {other:?}")),
    }
}
