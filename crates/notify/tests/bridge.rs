//! Unit tests for `NotificationBridge`.
//!
//! A recording `SystemNotifier` stands in for the OS surface so the tests
//! can assert exactly when a notification was raised, under which
//! permission, and that each push lands in the cache exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use trafficlens_notify::{
    DeliveryPath, FileStore, NotificationBridge, NotificationCache, NotificationRecord,
    Permission, ProviderPush, SystemNotifier, DEFAULT_CAPACITY,
};

struct RecordingNotifier {
    permission: Permission,
    shown: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new(permission: Permission) -> Arc<Self> {
        Arc::new(Self {
            permission,
            shown: Mutex::new(Vec::new()),
        })
    }

    async fn shown_titles(&self) -> Vec<String> {
        self.shown.lock().await.clone()
    }
}

#[async_trait]
impl SystemNotifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        self.permission
    }

    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn show(&self, record: &NotificationRecord) {
        self.shown.lock().await.push(record.title.clone());
    }
}

async fn bridge_with(
    dir: &tempfile::TempDir,
    notifier: Arc<RecordingNotifier>,
) -> (NotificationBridge, Arc<NotificationCache>) {
    let store = Arc::new(FileStore::new(dir.path().join("notifications.json")));
    let cache = Arc::new(
        NotificationCache::open(store, DEFAULT_CAPACITY)
            .await
            .expect("open cache"),
    );
    (
        NotificationBridge::new(Arc::clone(&cache), notifier),
        cache,
    )
}

fn push(message_id: Option<&str>, title: &str, path: DeliveryPath) -> ProviderPush {
    ProviderPush {
        message_id: message_id.map(str::to_owned),
        title: title.into(),
        body: "body".into(),
        category: "analysis".into(),
        payload: serde_json::json!({"job": 42}),
        path,
    }
}

// ---------------------------------------------------------------------------
// Test: foreground delivery feeds the alert bus and honours permission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreground_push_alerts_and_notifies_when_granted() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Granted);
    let (bridge, cache) = bridge_with(&dir, Arc::clone(&notifier)).await;
    let mut alerts = bridge.subscribe_alerts();

    assert!(
        bridge
            .handle_push(push(None, "Analysis complete", DeliveryPath::Foreground))
            .await
    );

    let alert = alerts.recv().await.expect("in-app alert");
    assert_eq!(alert.title, "Analysis complete");
    assert_eq!(notifier.shown_titles().await, vec!["Analysis complete"]);
    assert_eq!(cache.snapshot().await.len(), 1);
}

#[tokio::test]
async fn foreground_push_without_permission_skips_the_os_surface() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Denied);
    let (bridge, cache) = bridge_with(&dir, Arc::clone(&notifier)).await;
    let mut alerts = bridge.subscribe_alerts();

    bridge
        .handle_push(push(None, "quiet", DeliveryPath::Foreground))
        .await;

    // The in-app alert still fires and the push is still recorded.
    assert_eq!(alerts.recv().await.unwrap().title, "quiet");
    assert!(notifier.shown_titles().await.is_empty());
    assert_eq!(cache.snapshot().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: background delivery always reaches the OS surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_push_raises_an_os_notification() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Granted);
    let (bridge, cache) = bridge_with(&dir, Arc::clone(&notifier)).await;

    bridge
        .handle_push(push(None, "while away", DeliveryPath::Background))
        .await;

    assert_eq!(notifier.shown_titles().await, vec!["while away"]);
    assert_eq!(cache.snapshot().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: provider message ids deduplicate across delivery paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_provider_id_is_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Granted);
    let (bridge, cache) = bridge_with(&dir, notifier).await;

    assert!(
        bridge
            .handle_push(push(Some("msg-1"), "once", DeliveryPath::Background))
            .await
    );
    assert!(
        !bridge
            .handle_push(push(Some("msg-1"), "once", DeliveryPath::Foreground))
            .await
    );

    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "msg-1");
}

#[tokio::test]
async fn pushes_without_provider_ids_are_not_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Granted);
    let (bridge, cache) = bridge_with(&dir, notifier).await;

    // The platform promises one path per delivery when no id is present;
    // the bridge records whatever it is handed.
    bridge
        .handle_push(push(None, "a", DeliveryPath::Foreground))
        .await;
    bridge
        .handle_push(push(None, "a", DeliveryPath::Foreground))
        .await;

    assert_eq!(cache.snapshot().await.len(), 2);
}

// ---------------------------------------------------------------------------
// Test: the drain loop processes pushes until the provider hangs up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_drains_the_provider_stream() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new(Permission::Granted);
    let (bridge, cache) = bridge_with(&dir, notifier).await;
    let bridge = Arc::new(bridge);

    let (tx, rx) = mpsc::unbounded_channel();
    let worker = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.run(rx).await })
    };

    tx.send(push(Some("m1"), "one", DeliveryPath::Background))
        .unwrap();
    tx.send(push(Some("m2"), "two", DeliveryPath::Background))
        .unwrap();
    drop(tx);

    worker.await.expect("bridge loop exits cleanly");
    assert_eq!(cache.snapshot().await.len(), 2);
}
