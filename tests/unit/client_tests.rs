//! Unit tests for the client facade that need no server.

use futures_util::StreamExt;

use agent_bridge::session::{compose_prompt, AgentClient, AgentRegistry, HealthStatus};
use agent_bridge::{AppError, GlobalConfig};

fn config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r#"
[[agents]]
name = "router"
base_url = "http://127.0.0.1:9"

[[agents]]
name = "office"
base_url = "http://127.0.0.1:9"
"#,
    )
    .expect("valid config")
}

#[test]
fn registry_lists_agents_by_name() {
    let registry = AgentRegistry::from_agents(config().agents);

    let names: Vec<&str> = registry.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["office", "router"]);
    assert_eq!(registry.len(), 2);
    assert!(registry.get("router").is_ok());
    assert!(matches!(
        registry.get("ghost"),
        Err(AppError::UnknownAgent(name)) if name == "ghost"
    ));
}

#[test]
fn health_status_display() {
    assert_eq!(HealthStatus::Healthy { tools: 3 }.to_string(), "healthy (3 tools)");
    assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy (no tools)");
    assert_eq!(HealthStatus::Timeout.to_string(), "timeout");
    assert_eq!(
        HealthStatus::Error("transport: connection refused".into()).to_string(),
        "error: transport: connection refused"
    );
    assert!(HealthStatus::Healthy { tools: 1 }.is_healthy());
    assert!(!HealthStatus::Unhealthy.is_healthy());
}

#[test]
fn prompt_context_folding() {
    assert_eq!(
        compose_prompt("and tomorrow?", Some("User: weather today?\nAgent: sunny")),
        "Previous context:\nUser: weather today?\nAgent: sunny\n\nCurrent request: and tomorrow?"
    );
    assert_eq!(compose_prompt("hi", None), "hi");
}

#[tokio::test]
async fn unknown_agent_fails_before_io() {
    let client = AgentClient::from_config(&config()).expect("client");

    assert!(matches!(
        client.call_stream("ghost", "hi", None),
        Err(AppError::UnknownAgent(_))
    ));
    assert!(matches!(
        client.call("ghost", "hi", None).await,
        Err(AppError::UnknownAgent(_))
    ));
    assert!(matches!(
        client.list_tools("ghost").await,
        Err(AppError::UnknownAgent(_))
    ));
}

#[tokio::test]
async fn unreachable_agent_yields_error_chunk() {
    let client = AgentClient::from_config(&config()).expect("client");

    let chunks: Vec<_> = client
        .call_stream("router", "hi", None)
        .expect("known agent")
        .collect()
        .await;

    assert_eq!(chunks.len(), 1, "a failed session yields exactly one item");
    assert!(chunks[0].is_terminal());
    assert!(
        matches!(&chunks[0], agent_bridge::events::StreamChunk::Error(msg) if msg.starts_with("transport:")),
        "unexpected chunk: {:?}",
        chunks[0]
    );
}
