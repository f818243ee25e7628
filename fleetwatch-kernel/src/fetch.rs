use serde_json::Value;
use std::time::Duration;

/// Échecs d'un fetch amont (snapshot ou historique)
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("invalid JSON body: {0}")]
    Decode(String),
    /// Requête supplantée par une plus récente : pas une vraie erreur
    #[error("request superseded")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Transport(e.to_string()))
}

/// GET JSON ; tout statut non-2xx est un échec
pub async fn get_json(request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
}
