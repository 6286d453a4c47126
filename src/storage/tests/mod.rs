// src/storage/tests/mod.rs


// Behaviour every counter store must share, run against each backend
pub(crate) mod common {
    use std::time::Duration;
    use uuid::Uuid;

    use crate::config::TokenBucketConfig;
    use crate::error::StoreResult;
    use crate::key::window_key;
    use crate::storage::CounterStore;

    /// Fresh key namespace so runs against a shared Redis never collide
    pub fn namespace() -> String {
        format!("storage_test:{}", Uuid::new_v4())
    }

    pub async fn test_window_counter(store: &dyn CounterStore, now_ms: u64) -> StoreResult<()> {
        let base = format!("{}:counter", namespace());
        let key = window_key(&base, now_ms / 60_000);

        assert_eq!(store.increment_window(&key, Duration::from_secs(60)).await?, 1);
        assert_eq!(store.increment_window(&key, Duration::from_secs(60)).await?, 2);
        assert_eq!(store.increment_window(&key, Duration::from_secs(60)).await?, 3);

        assert_eq!(
            store
                .current_count(&base, now_ms, Duration::from_secs(60))
                .await?,
            3
        );

        store.reset(&base).await?;
        Ok(())
    }

    pub async fn test_request_log(store: &dyn CounterStore, now_ms: u64) -> StoreResult<()> {
        let key = format!("{}:log", namespace());
        let window = Duration::from_secs(10);

        let first = store.record_in_log(&key, now_ms, window, 2).await?;
        assert!(first.admitted);
        assert_eq!(first.count, 1);
        assert_eq!(first.oldest_ms, Some(now_ms));

        // same millisecond, still a separate entry
        let second = store.record_in_log(&key, now_ms, window, 2).await?;
        assert!(second.admitted);
        assert_eq!(second.count, 2);

        let third = store.record_in_log(&key, now_ms + 1, window, 2).await?;
        assert!(!third.admitted);
        assert_eq!(third.count, 2);

        let later = store
            .record_in_log(&key, now_ms + 10_000, window, 2)
            .await?;
        assert!(later.admitted, "entries one window old should be pruned");
        assert_eq!(later.count, 1);
        assert_eq!(later.oldest_ms, Some(now_ms + 10_000));

        assert_eq!(store.current_count(&key, now_ms + 10_000, window).await?, 1);

        store.reset(&key).await?;
        Ok(())
    }

    pub async fn test_token_bucket(store: &dyn CounterStore, now_ms: u64) -> StoreResult<()> {
        let key = format!("{}:bucket", namespace());
        let bucket = TokenBucketConfig {
            capacity: 2.0,
            refill_rate: 1.0,
        };

        assert!(store.bucket_state(&key).await?.is_none());

        let first = store.take_token(&key, now_ms, &bucket).await?;
        assert!(first.admitted);
        assert_eq!(first.tokens, 1.0);

        let second = store.take_token(&key, now_ms, &bucket).await?;
        assert!(second.admitted);
        assert_eq!(second.tokens, 0.0);

        let denied = store.take_token(&key, now_ms + 500, &bucket).await?;
        assert!(!denied.admitted);
        assert_eq!(denied.tokens, 0.5);

        let state = store.bucket_state(&key).await?.expect("bucket should exist");
        assert_eq!(state.last_refill_ms, now_ms + 500);
        assert_eq!(state.tokens, 0.5);

        let refilled = store.take_token(&key, now_ms + 1_000, &bucket).await?;
        assert!(refilled.admitted);
        assert_eq!(refilled.tokens, 0.0);

        store.reset(&key).await?;
        Ok(())
    }

    pub async fn test_reset_and_listing(store: &dyn CounterStore, now_ms: u64) -> StoreResult<()> {
        let ns = namespace();
        let alice = format!("{}:GET /members:user:alice", ns);
        let alicia = format!("{}:GET /members:user:alicia", ns);
        let ttl = Duration::from_secs(60);

        store.increment_window(&window_key(&alice, 1), ttl).await?;
        store.increment_window(&window_key(&alice, 2), ttl).await?;
        store.increment_window(&window_key(&alicia, 2), ttl).await?;
        store
            .record_in_log(&format!("{}:POST /posts:ip:10.0.0.1", ns), now_ms, ttl, 5)
            .await?;

        let keys = store.keys_with_prefix(&ns).await?;
        assert_eq!(keys.len(), 3, "sub-keys fold into their base key: {:?}", keys);
        assert!(keys.contains(&alice));
        assert!(keys.contains(&alicia));

        assert_eq!(store.reset(&alice).await?, 2);
        let keys = store.keys_with_prefix(&ns).await?;
        assert!(!keys.contains(&alice));
        assert!(keys.contains(&alicia), "reset must not reach a longer key");

        assert_eq!(store.reset(&alice).await?, 0);

        for key in keys {
            store.reset(&key).await?;
        }
        assert!(store.keys_with_prefix(&ns).await?.is_empty());
        Ok(())
    }
}
