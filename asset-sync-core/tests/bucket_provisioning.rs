use std::sync::Arc;

use asset_sync_core::bucket::{public_read_policy, BucketHandler, SystemBucketNames, MAX_ATTEMPTS};
use asset_sync_core::config::BucketConfig;
use asset_sync_core::contract::MockBucketClient;
use asset_sync_core::error::BucketError;
use chrono::Utc;
use mockall::Sequence;

const REGION: &str = "region";

fn config() -> BucketConfig {
    BucketConfig {
        private_prefix: "private".to_string(),
        public_prefix: "public".to_string(),
        region: REGION.to_string(),
        retry_delay_ms: 0,
    }
}

fn handler(client: MockBucketClient) -> BucketHandler {
    BucketHandler::new(Arc::new(client), config())
}

#[tokio::test]
async fn system_buckets_are_created() {
    let mut client = MockBucketClient::new();
    client
        .expect_bucket_exists()
        .withf(|b: &str| b.starts_with("public-"))
        .times(1)
        .returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .withf(|b: &str, region: &str| b.starts_with("public-") && region == REGION)
        .times(1)
        .returning(|_, _| Ok(()));
    client
        .expect_set_bucket_policy()
        .withf(|b: &str, policy: &str| b.starts_with("public-") && policy.contains("s3:GetObject"))
        .times(1)
        .returning(|_, _| Ok(()));
    client
        .expect_bucket_exists()
        .withf(|b: &str| b.starts_with("private-"))
        .times(1)
        .returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .withf(|b: &str, region: &str| b.starts_with("private-") && region == REGION)
        .times(1)
        .returning(|_, _| Ok(()));

    let names = handler(client).ensure_system_buckets(Utc::now()).await.unwrap();

    assert!(names.public.starts_with("public-"));
    assert!(names.private.starts_with("private-"));
}

#[tokio::test]
async fn existing_system_buckets_still_get_the_public_policy() {
    let mut client = MockBucketClient::new();
    client.expect_bucket_exists().times(2).returning(|_| Ok(true));
    client.expect_make_bucket().times(0);
    client
        .expect_set_bucket_policy()
        .withf(|b: &str, _policy: &str| b.starts_with("public-"))
        .times(1)
        .returning(|_, _| Ok(()));

    handler(client).ensure_system_buckets(Utc::now()).await.unwrap();
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let mut client = MockBucketClient::new();
    let mut public_seq = Sequence::new();
    client
        .expect_bucket_exists()
        .withf(|b: &str| b.starts_with("public-"))
        .times(1)
        .in_sequence(&mut public_seq)
        .returning(|_| Err("Test err".into()));
    client
        .expect_bucket_exists()
        .withf(|b: &str| b.starts_with("public-"))
        .times(1)
        .in_sequence(&mut public_seq)
        .returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .withf(|b: &str, _region: &str| b.starts_with("public-"))
        .times(1)
        .returning(|_, _| Ok(()));
    client
        .expect_set_bucket_policy()
        .times(1)
        .returning(|_, _| Ok(()));

    client
        .expect_bucket_exists()
        .withf(|b: &str| b.starts_with("private-"))
        .times(2)
        .returning(|_| Ok(false));
    let mut private_seq = Sequence::new();
    client
        .expect_make_bucket()
        .withf(|b: &str, _region: &str| b.starts_with("private-"))
        .times(1)
        .in_sequence(&mut private_seq)
        .returning(|_, _| Err("Test err".into()));
    client
        .expect_make_bucket()
        .withf(|b: &str, _region: &str| b.starts_with("private-"))
        .times(1)
        .in_sequence(&mut private_seq)
        .returning(|_, _| Ok(()));

    let names = handler(client).ensure_system_buckets(Utc::now()).await.unwrap();

    assert!(names.private.starts_with("private-"));
}

#[tokio::test]
async fn persistent_errors_give_up_after_max_attempts() {
    let mut client = MockBucketClient::new();
    client
        .expect_bucket_exists()
        .times(MAX_ATTEMPTS)
        .returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .times(MAX_ATTEMPTS)
        .returning(|_, _| Err("Test err".into()));
    client.expect_set_bucket_policy().times(0);

    let err = handler(client)
        .ensure_system_buckets(Utc::now())
        .await
        .unwrap_err();

    match &err {
        BucketError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, MAX_ATTEMPTS),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("Test err"));
}

#[tokio::test]
async fn policy_error_is_reported() {
    let mut client = MockBucketClient::new();
    client.expect_bucket_exists().returning(|_| Ok(true));
    client
        .expect_set_bucket_policy()
        .returning(|_, _| Err("denied".into()));

    let err = handler(client)
        .ensure_system_buckets(Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, BucketError::Policy { .. }));
}

#[tokio::test]
async fn create_if_missing_skips_existing_bucket() {
    let mut client = MockBucketClient::new();
    client
        .expect_bucket_exists()
        .withf(|b: &str| b == "bucket")
        .times(1)
        .returning(|_| Ok(true));
    client.expect_make_bucket().times(0);

    handler(client).create_if_missing("bucket", REGION).await.unwrap();
}

#[tokio::test]
async fn create_if_missing_does_not_retry() {
    let mut client = MockBucketClient::new();
    client.expect_bucket_exists().times(1).returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .withf(|b: &str, region: &str| b == "bucket" && region == REGION)
        .times(1)
        .returning(|_, _| Err("test error".into()));

    let err = handler(client)
        .create_if_missing("bucket", REGION)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("test error"));
}

#[tokio::test]
async fn check_buckets_recreates_missing_buckets() {
    let names = SystemBucketNames {
        public: "public-bucket".to_string(),
        private: "private-bucket".to_string(),
    };
    let mut client = MockBucketClient::new();
    client.expect_bucket_exists().times(2).returning(|_| Ok(false));
    client
        .expect_make_bucket()
        .withf(|b: &str, _region: &str| b == "public-bucket" || b == "private-bucket")
        .times(2)
        .returning(|_, _| Ok(()));
    client
        .expect_set_bucket_policy()
        .withf(|b: &str, policy: &str| b == "public-bucket" && policy == public_read_policy("public-bucket"))
        .times(1)
        .returning(|_, _| Ok(()));

    handler(client).check_buckets(&names).await.unwrap();
}

#[tokio::test]
async fn check_buckets_stops_on_private_error() {
    let names = SystemBucketNames {
        public: "public-bucket".to_string(),
        private: "private-bucket".to_string(),
    };
    let mut client = MockBucketClient::new();
    client
        .expect_bucket_exists()
        .withf(|b: &str| b == "private-bucket")
        .times(1)
        .returning(|_| Err("test error".into()));
    client.expect_set_bucket_policy().times(0);

    assert!(handler(client).check_buckets(&names).await.is_err());
}
