/**
 * FLEETWATCH KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Orchestration : config, préférences, moteur, producteurs (poller
 * snapshot, listener MQTT), API REST. Arrêt propre sur Ctrl-C via un
 * CancellationToken racine partagé par toutes les tâches.
 */

use anyhow::{Context, Result};
use fleetwatch_kernel::config::load_config;
use fleetwatch_kernel::engine::{spawn_engine_actor, EngineSettings, FleetEngine};
use fleetwatch_kernel::events::EventBus;
use fleetwatch_kernel::health::HealthTracker;
use fleetwatch_kernel::http::{build_router, AppState};
use fleetwatch_kernel::mqtt::spawn_mqtt_listener;
use fleetwatch_kernel::poller::SnapshotPoller;
use fleetwatch_kernel::prefs::{JsonFilePrefs, MemoryPrefs, PreferenceStore};
use fleetwatch_kernel::route_fetch::RouteFetcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleetwatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    info!("[kernel] FleetWatch kernel starting");

    // préférences : fichier JSON si possible, sinon mémoire
    let prefs: Arc<dyn PreferenceStore> = match cfg.prefs.path.as_deref() {
        Some(path) => match JsonFilePrefs::new(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "[kernel] prefs file unavailable, using memory store");
                Arc::new(MemoryPrefs::new())
            }
        },
        None => Arc::new(MemoryPrefs::new()),
    };

    let events = EventBus::new(cfg.engine.event_capacity);
    let engine = FleetEngine::new(EngineSettings::from_config(&cfg), prefs, events.clone()).into_shared();
    let health_tracker = HealthTracker::new();
    let cancel = CancellationToken::new();

    // file unique : tous les producteurs → un seul acteur
    let (tx, rx) = mpsc::channel(cfg.engine.queue_capacity.max(1));
    let mut tasks = vec![spawn_engine_actor(
        engine.clone(),
        rx,
        Duration::from_secs(cfg.engine.tick_secs.max(1)),
        cancel.clone(),
    )];

    if let Some(snapshot) = &cfg.snapshot {
        let poller = SnapshotPoller::new(snapshot).context("Failed to build snapshot client")?;
        tasks.push(poller.spawn(tx.clone(), events.clone(), health_tracker.clone(), cancel.clone()));
    } else {
        info!("[kernel] snapshot polling disabled");
    }

    if let Some(mqtt) = cfg.mqtt.clone() {
        tasks.push(spawn_mqtt_listener(mqtt, tx.clone(), health_tracker.clone(), cancel.clone()));
    } else {
        info!("[kernel] MQTT push disabled");
    }
    // sans producteur l'acteur continue de tourner sur le tick
    drop(tx);

    let routes = match &cfg.routes.url_template {
        Some(template) => Some(Arc::new(
            RouteFetcher::new(template.clone(), &cfg.routes).context("Failed to build route client")?,
        )),
        None => None,
    };

    let app_state = AppState {
        engine,
        health_tracker,
        routes,
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "[kernel] ctrl-c handler failed");
            }
            info!("[kernel] shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("[kernel] stopped");
    Ok(())
}
