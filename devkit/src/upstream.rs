/*!
Amont HTTP simulé

Serveur Axum local (port éphémère) qui répond par chemin avec une réponse
scriptée et enregistre chaque requête reçue (chemin + query).
Permet de tester polling, fetch historique, erreurs HTTP et timeouts sans
dépendre des vraies APIs.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Réponse scriptée pour un chemin
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16),
    /// Ne répond jamais (simule un amont bloqué)
    Hang,
}

#[derive(Clone)]
struct UpstreamState {
    routes: Arc<HashMap<String, Reply>>,
    hits: Arc<Mutex<Vec<String>>>,
}

pub struct FakeUpstream {
    addr: SocketAddr,
    hits: Arc<Mutex<Vec<String>>>,
    server: JoinHandle<()>,
}

impl FakeUpstream {
    pub async fn start(routes: Vec<(&str, Reply)>) -> Result<Self> {
        let state = UpstreamState {
            routes: Arc::new(
                routes
                    .into_iter()
                    .map(|(path, reply)| (path.to_string(), reply))
                    .collect(),
            ),
            hits: Arc::new(Mutex::new(Vec::new())),
        };
        let hits = state.hits.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().fallback(respond).with_state(state);
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "[devkit] fake upstream stopped");
            }
        });
        tracing::debug!(%addr, "[devkit] fake upstream listening");

        Ok(Self { addr, hits, server })
    }

    /// URL complète pour un chemin (les gabarits type `{entity_id}` passent tels quels)
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requêtes reçues, dans l'ordre d'arrivée
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().clone()
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn respond(State(state): State<UpstreamState>, uri: Uri) -> Response {
    state.hits.lock().push(uri.to_string());
    match state.routes.get(uri.path()).cloned() {
        Some(Reply::Json(body)) => Json(body).into_response(),
        Some(Reply::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(Reply::Hang) => std::future::pending().await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
