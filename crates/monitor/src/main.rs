//! Terminal monitor for one analysis job.
//!
//! Wires the realtime session directory and the notification bridge
//! together: follows the configured job's progress stream, surfaces
//! terminal frames as notifications, and exits on completion or Ctrl-C.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trafficlens_notify::{
    DeliveryPath, FileStore, LogNotifier, NotificationBridge, NotificationCache, ProviderPush,
    DEFAULT_CAPACITY,
};
use trafficlens_realtime::{
    AnalysisMessage, JobsApi, MessageKind, RealtimeConfig, SessionDirectory,
};

mod config;

use config::MonitorConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trafficlens_monitor=info,trafficlens_realtime=info,trafficlens_notify=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env();
    tracing::info!(job_id = config.job_id, "Starting analysis monitor");

    // Job-control boundary: one status poll up front so the user sees
    // where the job stands before frames arrive.
    let api = JobsApi::new(config.api_base_url.clone());
    match api.analysis_status(config.job_id).await {
        Ok(status) => tracing::info!(
            status = %status.status,
            percentage = status.percentage,
            "Job status",
        ),
        Err(e) => tracing::warn!(error = %e, "Status poll failed, continuing"),
    }

    // Notification surface: persisted cache behind the push bridge.
    let store = Arc::new(FileStore::new(&config.notification_store));
    let cache = Arc::new(
        NotificationCache::open(store, DEFAULT_CAPACITY)
            .await
            .expect("Failed to load the notification cache"),
    );
    let bridge = Arc::new(NotificationBridge::new(
        Arc::clone(&cache),
        Arc::new(LogNotifier),
    ));

    let (push_tx, push_rx) = mpsc::unbounded_channel();
    {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.run(push_rx).await });
    }

    let mut alerts = bridge.subscribe_alerts();
    tokio::spawn(async move {
        while let Ok(alert) = alerts.recv().await {
            tracing::info!(title = %alert.title, category = %alert.category, "Alert");
        }
    });

    // Realtime surface: one session for the configured job.
    let directory = Arc::new(SessionDirectory::new(RealtimeConfig::new(
        config.ws_base_url.clone(),
    )));
    let session = directory.get_or_create(config.job_id).await;

    session.subscribe(MessageKind::ProgressUpdate, |message| {
        if let AnalysisMessage::ProgressUpdate(p) = message {
            tracing::info!(
                processed = p.processed_frames,
                total = p.total_frames,
                vehicles = p.vehicles_detected,
                percentage = p.percentage,
                status = %p.status,
                "Progress",
            );
        }
    });
    session.subscribe(MessageKind::LoadingProgress, |message| {
        if let AnalysisMessage::LoadingProgress(l) = message {
            tracing::info!(progress = l.progress, message = %l.message, "Warm-up");
        }
    });
    session.subscribe(MessageKind::VehicleDetected, |message| {
        if let AnalysisMessage::VehicleDetected(d) = message {
            tracing::debug!(
                track_id = d.track_id,
                vehicle_type = %d.vehicle_type,
                confidence = d.confidence,
                frame = d.frame_number,
                "Detection",
            );
        }
    });
    session.subscribe(MessageKind::LogMessage, |message| {
        if let AnalysisMessage::LogMessage(log) = message {
            tracing::info!(level = %log.level, "[server] {}", log.message);
        }
    });

    // Terminal frames end the monitor and double as notifications.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<(), String>>();
    {
        let push_tx = push_tx.clone();
        let done_tx = done_tx.clone();
        session.subscribe(MessageKind::ProcessingComplete, move |message| {
            if let AnalysisMessage::ProcessingComplete(c) = message {
                let _ = push_tx.send(ProviderPush {
                    message_id: None,
                    title: "Analysis complete".into(),
                    body: format!("{} vehicles in {:.1}s", c.total_vehicles, c.processing_time),
                    category: "analysis".into(),
                    payload: serde_json::json!({ "analysis_id": c.analysis_id }),
                    path: DeliveryPath::Foreground,
                });
                let _ = done_tx.send(Ok(()));
            }
        });
    }
    session.subscribe(MessageKind::ProcessingError, move |message| {
        if let AnalysisMessage::ProcessingError(e) = message {
            let _ = push_tx.send(ProviderPush {
                message_id: None,
                title: "Analysis failed".into(),
                body: e.error.clone(),
                category: "analysis".into(),
                payload: serde_json::Value::Object(Default::default()),
                path: DeliveryPath::Foreground,
            });
            let _ = done_tx.send(Err(e.error.clone()));
        }
    });

    session
        .connect()
        .await
        .expect("Failed to connect to the analysis stream");

    tokio::select! {
        outcome = done_rx.recv() => match outcome {
            Some(Ok(())) => tracing::info!("Analysis completed"),
            Some(Err(error)) => tracing::error!(%error, "Analysis failed"),
            None => {}
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    session.disconnect();
    directory.release(config.job_id).await;
    tracing::info!(
        notifications = cache.snapshot().await.len(),
        "Monitor stopped",
    );
}
