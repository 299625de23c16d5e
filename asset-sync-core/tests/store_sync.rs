use std::path::Path;
use std::sync::Arc;

use asset_sync_core::config::StoreConfig;
use asset_sync_core::contract::MockObjectClient;
use asset_sync_core::error::StoreError;
use asset_sync_core::store::{normalize_object_name, Store, SyncPlan};
use mockall::Sequence;
use tokio_util::sync::CancellationToken;

fn store(client: MockObjectClient) -> Store {
    Store::new(Arc::new(client), &StoreConfig { upload_workers: 3 })
}

#[test]
fn object_names_are_prefixed_with_the_asset() {
    assert_eq!(normalize_object_name("asset", "readme.md"), "asset/readme.md");
    assert_eq!(normalize_object_name("asset", "docs/intro.md"), "asset/docs/intro.md");
    assert_eq!(normalize_object_name("asset/", "/docs/intro.md"), "asset/docs/intro.md");
    assert_eq!(normalize_object_name("asset", "./a.md"), "asset/a.md");
    assert_eq!(normalize_object_name("asset", r"docs\win.md"), "asset/docs/win.md");
}

#[test]
fn replace_plan_deletes_everything_existing() {
    let plan = SyncPlan::replace(
        vec!["asset/old.md".to_string()],
        &["new.md".to_string()],
    );
    assert_eq!(plan.to_delete, vec!["asset/old.md".to_string()]);
    assert_eq!(plan.to_upload, vec!["new.md".to_string()]);
    assert!(!plan.is_empty());
    assert!(SyncPlan::default().is_empty());
}

#[tokio::test]
async fn listing_uses_the_asset_prefix() {
    let mut client = MockObjectClient::new();
    client
        .expect_list_objects()
        .withf(|bucket: &str, prefix: &str| bucket == "bucket" && prefix == "asset/")
        .times(1)
        .returning(|_, _| Ok(vec!["asset/a.md".to_string()]));

    let objects = store(client).list_objects("bucket", "asset").await.unwrap();

    assert_eq!(objects, vec!["asset/a.md".to_string()]);
}

#[tokio::test]
async fn list_error_names_bucket_and_prefix() {
    let mut client = MockObjectClient::new();
    client
        .expect_list_objects()
        .returning(|_, _| Err("unreachable".into()));

    let err = store(client).list_objects("bucket", "asset").await.unwrap_err();

    match err {
        StoreError::List { bucket, prefix, .. } => {
            assert_eq!(bucket, "bucket");
            assert_eq!(prefix, "asset/");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn delete_objects_removes_each_listed_object() {
    let mut client = MockObjectClient::new();
    client
        .expect_list_objects()
        .returning(|_, _| Ok(vec!["asset/a.md".to_string(), "asset/b.md".to_string()]));
    client
        .expect_remove_object()
        .withf(|bucket: &str, object: &str| bucket == "bucket" && object.starts_with("asset/"))
        .times(2)
        .returning(|_, _| Ok(()));

    store(client).delete_objects("bucket", "asset").await.unwrap();
}

#[tokio::test]
async fn contains_all_objects_detects_missing_files() {
    let mut client = MockObjectClient::new();
    client
        .expect_list_objects()
        .times(2)
        .returning(|_, _| Ok(vec!["asset/a.md".to_string(), "asset/docs/b.md".to_string()]));
    let store = store(client);

    let all = store
        .contains_all_objects("bucket", "asset", &["a.md".to_string(), "docs/b.md".to_string()])
        .await
        .unwrap();
    let some = store
        .contains_all_objects("bucket", "asset", &["a.md".to_string(), "c.md".to_string()])
        .await
        .unwrap();

    assert!(all);
    assert!(!some);
}

#[tokio::test]
async fn publish_deletes_before_uploading() {
    let mut client = MockObjectClient::new();
    let mut seq = Sequence::new();
    client
        .expect_list_objects()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(vec!["asset/stale.md".to_string()]));
    client
        .expect_remove_object()
        .withf(|_bucket: &str, object: &str| object == "asset/stale.md")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    client
        .expect_put_object()
        .withf(|_bucket: &str, object: &str, path: &Path| {
            object == "asset/fresh.md" && path == Path::new("/content/fresh.md")
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(5));

    let results = store(client)
        .publish(
            &CancellationToken::new(),
            "bucket",
            "asset",
            Path::new("/content"),
            &["fresh.md".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].object_name, "asset/fresh.md");
    assert_eq!(results[0].size, 5);
}

#[tokio::test]
async fn upload_failures_are_aggregated() {
    let mut client = MockObjectClient::new();
    client
        .expect_put_object()
        .times(5)
        .returning(|_, object: &str, _| {
            if object.ends_with("2.md") || object.ends_with("4.md") {
                Err("disk full".into())
            } else {
                Ok(1)
            }
        });
    let files: Vec<String> = (0..5).map(|i| format!("{i}.md")).collect();

    let err = store(client)
        .put_objects(
            &CancellationToken::new(),
            "bucket",
            "asset",
            Path::new("/content"),
            &files,
        )
        .await
        .unwrap_err();

    match err {
        StoreError::Upload { total, failed } => {
            assert_eq!(total, 5);
            let names: Vec<&str> = failed.iter().map(|e| e.file_name.as_str()).collect();
            assert_eq!(names, vec!["2.md", "4.md"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_upload_reports_cancellation() {
    let mut client = MockObjectClient::new();
    client.expect_put_object().returning(|_, _, _| Ok(1));
    let token = CancellationToken::new();
    token.cancel();

    let err = store(client)
        .put_objects(
            &token,
            "bucket",
            "asset",
            Path::new("/content"),
            &["a.md".to_string()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
}

#[tokio::test]
async fn empty_upload_makes_no_calls() {
    let mut client = MockObjectClient::new();
    client.expect_put_object().times(0);

    let results = store(client)
        .put_objects(
            &CancellationToken::new(),
            "bucket",
            "asset",
            Path::new("/content"),
            &[],
        )
        .await
        .unwrap();

    assert!(results.is_empty());
}
