//! Command-line demo for the cloud-actions engine.
//!
//! Run with: cargo run -p cloud-actions-cli -- <project-id> <action-name> [payload-json]
//!
//! Dispatches one action against the default region, printing the session
//! state transitions and the response entries. The credential is held in
//! process memory; every run starts from a fresh anonymous session.

use std::sync::Arc;

use anyhow::{Context, bail};
use cloud_actions_client::{Action, Capabilities, ClientConfig, CloudClient};
use cloud_actions_store::MemoryStore;
use cloud_actions_transport::{ReqwestTransport, TungsteniteTransport};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(project_id), Some(action_name)) = (args.next(), args.next()) else {
        bail!("usage: cloud-actions-cli <project-id> <action-name> [payload-json]");
    };
    let payload = args
        .next()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(&raw).context("payload is not valid JSON")
        })
        .transpose()?;

    let client = CloudClient::new();
    client.initialize(
        ClientConfig::new(project_id),
        Capabilities {
            store: Arc::new(MemoryStore::new()),
            http: Arc::new(ReqwestTransport::new()?),
            socket: Some(Arc::new(TungsteniteTransport::new())),
            realtime: None,
        },
    )?;

    let mut states = client.session_states()?;
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            tracing::info!(status = ?state.status, user = ?state.user_id, "Session state");
        }
    });

    let mut action = Action::new(action_name);
    if let Some(payload) = payload {
        action = action.with_payload(payload);
    }

    let entries = client.dispatch(action).await?;
    for entry in entries {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    }

    client.dispose();
    Ok(())
}
