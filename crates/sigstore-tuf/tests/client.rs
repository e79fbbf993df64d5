mod common;

use common::{config, files_under, locator, CountingStore, FakeEngine, MemoryMirror, MIRROR, ROOT};
use sigstore_tuf::{
    Always, Error, FileSystemStore, StatusKind, TufClient, TufClientBuilder, TufConfig,
    UsageKind, VersionAtMost,
};
use tempfile::TempDir;

const FULCIO_TARGETS: &[common::Published<'static>] = &[
    ("fulcio.crt.pem", b"fulcio-v2".as_slice(), Some(("Fulcio", "Active"))),
    ("fulcio_v1.crt.pem", b"fulcio-v1".as_slice(), Some(("Fulcio", "Expired"))),
    ("rekor.pub", b"rekor-key".as_slice(), Some(("Rekor", "Active"))),
    ("x", b"untagged".as_slice(), None),
];

fn builder(mirror: &MemoryMirror, config: TufConfig) -> TufClientBuilder {
    TufClient::builder(config)
        .root_locator(locator())
        .fetcher(mirror.clone())
        .engine(FakeEngine::new(mirror))
}

async fn bootstrap(mirror: &MemoryMirror, dir: &TempDir) -> TufClient {
    builder(mirror, config(dir.path()).with_root(ROOT))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_targets_match_published_content() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);

    let client = bootstrap(&mirror, &dir).await;
    for (name, content, _) in FULCIO_TARGETS {
        assert_eq!(client.get_target(name).unwrap(), *content);
    }
    assert!(matches!(client.get_target("nope"), Err(Error::NotFound(_))));
    client.close();
}

#[tokio::test]
async fn test_fresh_cache_is_served_without_network_or_writes() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    bootstrap(&mirror, &dir).await.close();

    let before = files_under(dir.path());
    let fetches = mirror.fetches();

    for _ in 0..3 {
        let store = CountingStore::new(FileSystemStore::new(dir.path()));
        let client = builder(&mirror, config(dir.path()))
            .store(store.clone())
            .expiration_checker(Always(false))
            .build()
            .await
            .unwrap();
        assert_eq!(client.get_target("rekor.pub").unwrap(), b"rekor-key");
        client.close();
        assert_eq!(store.writes(), 0);
    }

    assert_eq!(mirror.fetches(), fetches);
    assert_eq!(files_under(dir.path()), before);
}

#[tokio::test]
async fn test_disabled_persistence_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let cache = dir.path().join("cache");
    let mirror = MemoryMirror::new();

    for version in 1..=3 {
        mirror.publish(version, FULCIO_TARGETS);
        let client = builder(&mirror, config(&cache).with_root(ROOT).without_cache())
            .expiration_checker(Always(true))
            .build()
            .await
            .unwrap();
        assert_eq!(client.get_target("x").unwrap(), b"untagged");
        assert!(client.root_status().local.is_none());
        client.close();
    }

    assert!(!cache.exists());
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn test_expired_cache_is_refreshed_and_committed() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    bootstrap(&mirror, &dir).await.close();

    let fetches = mirror.fetches();
    let store = CountingStore::new(FileSystemStore::new(dir.path()));
    let client = builder(&mirror, config(dir.path()))
        .store(store.clone())
        .expiration_checker(Always(true))
        .build()
        .await
        .unwrap();

    assert!(mirror.fetches() > fetches);
    assert!(store.writes() >= 1);
    assert_eq!(client.get_target("fulcio.crt.pem").unwrap(), b"fulcio-v2");
}

#[tokio::test]
async fn test_tagged_targets_are_returned_with_their_status() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    let client = bootstrap(&mirror, &dir).await;

    let entries = client
        .get_targets_by_meta(UsageKind::Fulcio, &["x"])
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.usage == UsageKind::Fulcio));
    assert!(entries.iter().all(|e| e.name != "x"));
    let statuses: Vec<_> = entries.iter().map(|e| e.status).collect();
    assert!(statuses.contains(&StatusKind::Active));
    assert!(statuses.contains(&StatusKind::Expired));
}

#[tokio::test]
async fn test_untagged_fallback_is_active() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    let client = bootstrap(&mirror, &dir).await;

    let entries = client
        .get_targets_by_meta(UsageKind::Unknown, &["x"])
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "x");
    assert_eq!(entries[0].content, b"untagged");
    assert_eq!(entries[0].status, StatusKind::Active);
}

#[tokio::test]
async fn test_missing_fallback_is_not_found() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, &[("x", b"untagged".as_slice(), None)]);
    let client = bootstrap(&mirror, &dir).await;

    for usage in [UsageKind::Fulcio, UsageKind::CtLog, UsageKind::Unknown] {
        let err = client.get_targets_by_meta(usage, &["missing"]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("missing"));
    }
}

#[tokio::test]
async fn test_new_remote_version_is_picked_up() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, &[("trusted_root.json", b"v1".as_slice(), None)]);
    bootstrap(&mirror, &dir).await.close();

    mirror.publish(2, &[("trusted_root.json", b"v2".as_slice(), None)]);

    // A fresh-looking cache keeps serving the old version
    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(false))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v1");
    client.close();

    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(VersionAtMost(1))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v2");
    client.close();

    // Version 2 is now cached and no longer considered expired
    let fetches = mirror.fetches();
    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(VersionAtMost(1))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v2");
    assert_eq!(mirror.fetches(), fetches);
}

#[tokio::test]
async fn test_rollback_fails_and_keeps_previous_bundle() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(2, &[("trusted_root.json", b"v2".as_slice(), None)]);
    bootstrap(&mirror, &dir).await.close();

    mirror.publish(1, &[("trusted_root.json", b"v1".as_slice(), None)]);
    let err = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(true))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Verification(_)), "got {:?}", err);

    // The cached bundle is untouched and still served while fresh
    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(false))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v2");
}

#[tokio::test]
async fn test_refresh_failures_are_fatal() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    bootstrap(&mirror, &dir).await.close();
    let before = files_under(dir.path());

    mirror.set_reject(true);
    let err = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(true))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Verification(_)), "got {:?}", err);
    mirror.set_reject(false);

    mirror.set_offline(true);
    let err = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(true))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)), "got {:?}", err);

    assert_eq!(files_under(dir.path()), before);
}

#[tokio::test]
async fn test_served_content_is_checked_against_metadata() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    mirror.tamper("rekor.pub", b"evil-key".as_slice());

    let err = builder(&mirror, config(dir.path()).with_root(ROOT))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Verification(_)), "got {:?}", err);
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn test_tampered_cache_forces_refresh() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);
    bootstrap(&mirror, &dir).await.close();

    let store = FileSystemStore::new(dir.path());
    sigstore_tuf::MetadataStore::put(&store, "targets/rekor.pub", b"evil-key")
        .await
        .unwrap();

    let fetches = mirror.fetches();
    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(Always(false))
        .build()
        .await
        .unwrap();
    assert!(mirror.fetches() > fetches);
    assert_eq!(client.get_target("rekor.pub").unwrap(), b"rekor-key");
}

#[tokio::test]
async fn test_initialize_records_mirror_and_replaces_bundle() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, &[("trusted_root.json", b"v1".as_slice(), None)]);
    bootstrap(&mirror, &dir).await.close();

    mirror.publish(2, &[("trusted_root.json", b"v2".as_slice(), None)]);
    let client = builder(
        &mirror,
        TufConfig::default()
            .with_cache_dir(dir.path())
            .with_mirror("https://other.example.com/repo")
            .with_root(ROOT),
    )
    .initialize()
    .await
    .unwrap();
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v2");
    client.close();

    // No mirror configured: the one recorded by initialize is used
    let client = builder(&mirror, TufConfig::default().with_cache_dir(dir.path()))
        .expiration_checker(Always(false))
        .build()
        .await
        .unwrap();
    assert_eq!(
        client.config().remote_url.as_str(),
        "https://other.example.com/repo/"
    );
    assert_eq!(client.get_target("trusted_root.json").unwrap(), b"v2");
}

#[tokio::test]
async fn test_initialize_without_root_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);

    let err = builder(&mirror, config(dir.path()))
        .initialize()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert_eq!(mirror.fetches(), 0);
}

#[tokio::test]
async fn test_untrusted_explicit_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(1, FULCIO_TARGETS);

    let err = builder(&mirror, config(dir.path()).with_root(b"{}".to_vec()))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Verification(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_root_status() {
    let dir = TempDir::new().unwrap();
    let mirror = MemoryMirror::new();
    mirror.publish(4, FULCIO_TARGETS);
    let client = bootstrap(&mirror, &dir).await;

    let status = client.root_status();
    assert_eq!(status.local.as_deref(), Some(dir.path()));
    assert_eq!(status.remote.as_str(), format!("{}/", MIRROR));
    assert_eq!(
        status.targets,
        vec!["fulcio.crt.pem", "fulcio_v1.crt.pem", "rekor.pub", "x"]
    );
    assert!(!status.bundle_expired);
    assert_eq!(status.metadata["timestamp.json"].version, 4);
    assert_eq!(status.metadata["targets.json"].version, 4);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["bundle_expired"], false);
    assert_eq!(json["targets"][3], "x");

    let client = builder(&mirror, config(dir.path()))
        .expiration_checker(VersionAtMost(10))
        .store(FileSystemStore::new(dir.path()))
        .build()
        .await;
    // Expired by policy and refreshed to the same version, still expired
    assert!(client.unwrap().root_status().bundle_expired);
}
