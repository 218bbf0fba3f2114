//! Azure AD rotation against a mock authority

mod common;

use std::sync::Arc;

use common::{MockServer, Route, oidc_routes};
use credential_rotator::config::EndpointConfig;
use credential_rotator::policy::{
    AzureCredentials, CredentialPolicy, OidcConfig, ProviderCredentials, SecretRef,
};
use credential_rotator::rotator::azure::AZURE_ACCESS_TOKEN_KEY;
use credential_rotator::rotator::{DEFAULT_PRE_ROTATION_WINDOW, Rotator, RotatorDeps, build_rotator};
use credential_rotator::store::InMemorySecretStore;
use credential_rotator::token::azure::DEFAULT_AZURE_SCOPE;
use credential_rotator::transport::Transports;
use pretty_assertions::assert_eq;
use serde_json::json;

const TENANT: &str = "72f988bf-86f1-41af-91ab-2d7cd011db47";
const TOKEN_PATH: &str = "/72f988bf-86f1-41af-91ab-2d7cd011db47/oauth2/v2.0/token";

fn aad_route() -> Route {
    Route::json(
        TOKEN_PATH,
        json!({"token_type": "Bearer", "expires_in": 3599, "access_token": "aad-token"}),
    )
}

fn deps(store: Arc<InMemorySecretStore>, base: &str) -> RotatorDeps {
    RotatorDeps::new(
        store,
        Arc::new(Transports::direct()),
        EndpointConfig {
            azure_authority: base.to_string(),
            ..EndpointConfig::default()
        },
        DEFAULT_PRE_ROTATION_WINDOW,
    )
}

fn secret_ref(name: &str) -> SecretRef {
    SecretRef {
        name: name.into(),
        namespace: None,
    }
}

#[tokio::test]
async fn client_secret_flow() {
    // GIVEN: a client secret in the policy namespace
    let server = MockServer::start(|_| vec![aad_route()]).await;
    let store = Arc::new(InMemorySecretStore::new());
    store.insert_values("ai", "aad-app", &[("client-secret", "app-secret")]);
    let policy = CredentialPolicy {
        namespace: "ai".into(),
        name: "openai".into(),
        provider: ProviderCredentials::Azure(AzureCredentials {
            tenant_id: TENANT.into(),
            client_id: "app-id".into(),
            client_secret_ref: Some(secret_ref("aad-app")),
            oidc: None,
            scope: None,
        }),
    };
    let rotator = build_rotator(&policy, &deps(store.clone(), &server.base))
        .unwrap()
        .unwrap();

    // WHEN: rotated
    let expires_at = rotator.rotate().await.unwrap();

    // THEN: a client-credentials grant with the default scope
    let requests = server.requests_to(TOKEN_PATH);
    assert_eq!(requests.len(), 1);
    let form = requests[0].form();
    assert_eq!(form["grant_type"], "client_credentials");
    assert_eq!(form["client_id"], "app-id");
    assert_eq!(form["client_secret"], "app-secret");
    assert_eq!(form["scope"], DEFAULT_AZURE_SCOPE);

    // AND: exactly one key stored, expiry annotated
    let secret = store.get("ai", "llm-credentials-openai").unwrap();
    assert_eq!(secret.data.len(), 1);
    assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("aad-token"));
    assert_eq!(secret.expires_at().unwrap(), expires_at);
}

#[tokio::test]
async fn federated_flow_presents_oidc_token_as_assertion() {
    // GIVEN: an OIDC issuer and the AAD endpoint on one mock
    let server = MockServer::start(|base| {
        let mut routes = oidc_routes(base, "oidc-assertion");
        routes.push(aad_route());
        routes
    })
    .await;
    let store = Arc::new(InMemorySecretStore::new());
    store.insert_values("ai", "oidc-client", &[("client-secret", "s3cret")]);
    let policy = CredentialPolicy {
        namespace: "ai".into(),
        name: "openai".into(),
        provider: ProviderCredentials::Azure(AzureCredentials {
            tenant_id: TENANT.into(),
            client_id: "app-id".into(),
            client_secret_ref: None,
            oidc: Some(OidcConfig {
                issuer: server.base.clone(),
                token_endpoint: None,
                client_id: "rotator".into(),
                client_secret: secret_ref("oidc-client"),
                scopes: Vec::new(),
            }),
            scope: Some("api://llm/.default".into()),
        }),
    };
    let rotator = build_rotator(&policy, &deps(store.clone(), &server.base))
        .unwrap()
        .unwrap();

    // WHEN: rotated
    rotator.rotate().await.unwrap();

    // THEN: the OIDC token went out as a JWT bearer client assertion
    let form = server.requests_to(TOKEN_PATH)[0].form();
    assert_eq!(
        form["client_assertion_type"],
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
    );
    assert_eq!(form["client_assertion"], "oidc-assertion");
    assert_eq!(form["scope"], "api://llm/.default");
    assert!(!form.contains_key("client_secret"));
    let secret = store.get("ai", "llm-credentials-openai").unwrap();
    assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("aad-token"));
}
