//! Configuration to running scheduler, end to end

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockServer, Route};
use credential_rotator::config::Config;
use credential_rotator::rotator::azure::AZURE_ACCESS_TOKEN_KEY;
use credential_rotator::rotator::{Rotator, RotatorDeps, build_rotator};
use credential_rotator::schedule::Scheduler;
use credential_rotator::store::InMemorySecretStore;
use credential_rotator::transport::Transports;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn config(authority: &str) -> Config {
    let yaml = format!(
        r"
pre_rotation_window: 5m
failure_requeue: 1s
store:
  backend: memory
endpoints:
  azure_authority: {authority}
policies:
  - namespace: ai
    name: openai
    provider:
      type: azure
      tenant_id: contoso
      client_id: app-id
      client_secret_ref:
        name: aad-app
  - namespace: ai
    name: anthropic
    provider:
      type: api_key
      secret_ref:
        name: anthropic-key
"
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn scheduler_rotates_configured_policies_until_cancelled() {
    // GIVEN: an Azure policy, an API-key policy and a mock authority
    let server = MockServer::start(|_| {
        vec![Route::json(
            "/contoso/oauth2/v2.0/token",
            json!({"access_token": "aad-token", "expires_in": 3600}),
        )]
    })
    .await;
    let config = config(&server.base);
    config.validate().unwrap();

    let store = Arc::new(InMemorySecretStore::new());
    store.insert_values("ai", "aad-app", &[("client-secret", "app-secret")]);
    let deps = RotatorDeps::new(
        store.clone(),
        Arc::new(Transports::direct()),
        config.endpoints.clone(),
        config.pre_rotation_window,
    );

    // WHEN: rotators are built and scheduled
    let rotators: Vec<Arc<dyn Rotator>> = config
        .policies
        .iter()
        .filter_map(|p| build_rotator(p, &deps).unwrap())
        .map(|r| Arc::new(r) as Arc<dyn Rotator>)
        .collect();
    assert_eq!(rotators.len(), 1);

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(rotators, config.pre_rotation_window, config.failure_requeue);
    let run = tokio::spawn(scheduler.run(shutdown.clone()));

    let mut rotated = None;
    for _ in 0..100 {
        rotated = store.get("ai", "llm-credentials-openai");
        if rotated.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    // THEN: the Azure credential was written once and the scheduler stopped
    let secret = rotated.expect("credential secret was not written");
    assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("aad-token"));
    assert_eq!(server.requests_to("/contoso/oauth2/v2.0/token").len(), 1);
    assert!(store.get("ai", "llm-credentials-anthropic").is_none());
}
