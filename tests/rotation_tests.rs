//! Rotator contract: scheduling reads, first rotation, updates and failures

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use credential_rotator::rotator::azure::AZURE_ACCESS_TOKEN_KEY;
use credential_rotator::rotator::{
    AzureRotator, DEFAULT_PRE_ROTATION_WINDOW, NO_SECRET, Rotator, SecretTarget,
};
use credential_rotator::store::{
    CredentialSecret, EXPIRATION_ANNOTATION_KEY, InMemorySecretStore, SecretStore, StoreError,
    format_expiration,
};
use credential_rotator::token::StaticTokenProvider;
use pretty_assertions::assert_eq;

const SECRET: &str = "llm-credentials-openai";

fn rotator(store: &Arc<InMemorySecretStore>, provider: StaticTokenProvider) -> AzureRotator {
    AzureRotator::new(
        SecretTarget::new("ai", "openai", DEFAULT_PRE_ROTATION_WINDOW, store.clone()).unwrap(),
        Arc::new(provider),
    )
}

fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap()
}

fn seed(store: &InMemorySecretStore, expires_at: DateTime<Utc>, extra_annotation: bool) {
    let mut annotations = BTreeMap::from([(
        EXPIRATION_ANNOTATION_KEY.to_string(),
        format_expiration(expires_at),
    )]);
    if extra_annotation {
        annotations.insert("owner".to_string(), "platform".to_string());
    }
    store.insert(CredentialSecret {
        namespace: "ai".into(),
        name: SECRET.into(),
        data: BTreeMap::from([(AZURE_ACCESS_TOKEN_KEY.to_string(), b"old-token".to_vec())]),
        annotations,
        resource_version: None,
    });
}

#[tokio::test]
async fn pre_rotation_time_is_idempotent() {
    // GIVEN: a stored credential
    let store = Arc::new(InMemorySecretStore::new());
    seed(&store, Utc::now() + TimeDelta::hours(1), false);
    let r = rotator(&store, StaticTokenProvider::new("t", Utc::now()));

    // WHEN: read twice
    let first = r.pre_rotation_time().await.unwrap();
    let second = r.pre_rotation_time().await.unwrap();

    // THEN: same answer, no writes
    assert_eq!(first, second);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn first_rotation_creates_secret() {
    // GIVEN: no secret, 5m window, provider token valid for 2h
    let store = Arc::new(InMemorySecretStore::new());
    let expiry = Utc::now() + TimeDelta::hours(2);
    let r = rotator(&store, StaticTokenProvider::new("fresh", expiry));

    // WHEN: scheduled and rotated
    let pre = r.pre_rotation_time().await.unwrap();
    assert_eq!(pre, NO_SECRET);
    assert!(r.is_expired(pre));
    let got = r.rotate().await.unwrap();

    // THEN: created with the returned expiry in the annotation
    assert_eq!(got, whole_seconds(expiry));
    let secret = store.get("ai", SECRET).unwrap();
    assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("fresh"));
    assert_eq!(
        secret.annotations[EXPIRATION_ANNOTATION_KEY],
        format_expiration(got)
    );
    assert_eq!(secret.expires_at().unwrap(), got);
}

#[tokio::test]
async fn expired_secret_is_updated_in_place() {
    // GIVEN: a secret that expired an hour ago, carrying an unrelated annotation
    let store = Arc::new(InMemorySecretStore::new());
    seed(&store, Utc::now() - TimeDelta::hours(1), true);
    let expiry = Utc::now() + TimeDelta::hours(2);
    let r = rotator(&store, StaticTokenProvider::new("renewed", expiry));

    // WHEN: rotated
    assert!(r.is_expired(r.pre_rotation_time().await.unwrap()));
    let got = r.rotate().await.unwrap();

    // THEN: updated, not recreated: the unrelated annotation survives
    let secret = store.get("ai", SECRET).unwrap();
    assert_eq!(got, whole_seconds(expiry));
    assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("renewed"));
    assert_eq!(secret.annotations["owner"], "platform");
    assert_eq!(secret.expires_at().unwrap(), got);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn failed_fetch_leaves_secret_byte_for_byte() {
    // GIVEN: an existing secret and a failing provider
    let store = Arc::new(InMemorySecretStore::new());
    seed(&store, Utc::now() - TimeDelta::minutes(1), true);
    let before = store.get("ai", SECRET).unwrap();
    let r = rotator(&store, StaticTokenProvider::failing("AADSTS7000215"));

    // WHEN: rotated
    let result = r.rotate().await;

    // THEN: error, no write, identical record
    let err = result.unwrap_err();
    assert!(err.to_string().contains("AADSTS7000215"));
    assert_eq!(store.write_count(), 0);
    assert_eq!(store.get("ai", SECRET).unwrap(), before);
}

#[tokio::test]
async fn failed_first_fetch_creates_nothing() {
    let store = Arc::new(InMemorySecretStore::new());
    let r = rotator(&store, StaticTokenProvider::failing("unreachable"));

    assert!(r.rotate().await.is_err());

    assert!(store.is_empty());
}

#[tokio::test]
async fn pre_rotation_time_subtracts_window_exactly() {
    // GIVEN: expiry E one hour out, window W = 5m
    let store = Arc::new(InMemorySecretStore::new());
    let e = whole_seconds(Utc::now() + TimeDelta::hours(1));
    seed(&store, e, false);
    let r = rotator(&store, StaticTokenProvider::new("t", Utc::now()));

    // WHEN: read
    let pre = r.pre_rotation_time().await.unwrap();

    // THEN: E - W, not yet expired
    assert_eq!(pre, e - TimeDelta::minutes(5));
    assert!(!r.is_expired(pre));
}

#[tokio::test]
async fn inside_window_is_expired() {
    // GIVEN: expiry 2m out with a 5m window
    let store = Arc::new(InMemorySecretStore::new());
    seed(&store, Utc::now() + TimeDelta::minutes(2), false);
    let r = rotator(&store, StaticTokenProvider::new("t", Utc::now()));

    // WHEN/THEN: the pre-rotation time has passed
    let pre = r.pre_rotation_time().await.unwrap();
    assert!(pre < Utc::now());
    assert!(r.is_expired(pre));
}

#[tokio::test]
async fn unparsable_annotation_is_reported() {
    // GIVEN: a secret with a garbage expiry
    let store = Arc::new(InMemorySecretStore::new());
    store.insert(CredentialSecret {
        namespace: "ai".into(),
        name: SECRET.into(),
        data: BTreeMap::new(),
        annotations: BTreeMap::from([(
            EXPIRATION_ANNOTATION_KEY.to_string(),
            "next tuesday".to_string(),
        )]),
        resource_version: None,
    });
    let r = rotator(&store, StaticTokenProvider::new("t", Utc::now()));

    // WHEN: read
    let err = r.pre_rotation_time().await.unwrap_err();

    // THEN: an error, not the zero time
    assert!(err.to_string().contains("next tuesday"), "{err}");
}

#[tokio::test]
async fn concurrent_creates_conflict() {
    // GIVEN: two writers racing to create the same secret
    let store = Arc::new(InMemorySecretStore::new());
    let expiry = Utc::now() + TimeDelta::hours(1);

    // WHEN: both create at once
    let (a, b) = tokio::join!(
        store.create("ai", SECRET, BTreeMap::new(), expiry),
        store.create("ai", SECRET, BTreeMap::new(), expiry),
    );

    // THEN: exactly one wins, the other sees a conflict
    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
        .count();
    assert_eq!(conflicts, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn stale_update_conflicts() {
    // GIVEN: two readers of the same version
    let store = Arc::new(InMemorySecretStore::new());
    seed(&store, Utc::now(), false);
    let first = store.lookup("ai", SECRET).await.unwrap();
    let second = store.lookup("ai", SECRET).await.unwrap();
    let expiry = Utc::now() + TimeDelta::hours(1);

    // WHEN: both update
    store.update(first, BTreeMap::new(), expiry).await.unwrap();
    let late = store.update(second, BTreeMap::new(), expiry).await;

    // THEN: the second writer loses
    assert!(matches!(late, Err(StoreError::Conflict { .. })));
    assert_eq!(store.write_count(), 1);
}
