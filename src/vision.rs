//! Vision service client.
//! The remote service owns corner detection, move legality and FEN
//! computation; this module only speaks its HTTP contract. Every reply is
//! decoded here into typed values (FENs checked with shakmaty, error tags
//! turned into `Fault`), so nothing downstream handles raw JSON.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::fault::Fault;
use crate::frame::Frame;
use crate::session::Outcome;

/// Transport-level failures: the request did not yield a usable reply.
///
/// During polling these are retried on the next tick and never shown to
/// the user.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Request to vision service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Vision service returned HTTP {status} for {path}")]
    Status { path: String, status: StatusCode },

    #[error("Malformed reply from {path}: {details}")]
    Decode { path: String, details: String },

    #[error("Vision service returned an invalid FEN '{fen}': {details}")]
    InvalidFen { fen: String, details: String },

    #[error("Invalid vision service URL '{0}'")]
    BadEndpoint(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Reply to the resume probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeReply {
    /// Physical and digital boards agree; `exact` is false when only piece colours matched.
    Aligned { exact: bool },
    Fault(Fault),
}

/// Reply to the last-move request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LastMoveReply {
    Settled {
        fen: String,
        san: Option<String>,
        outcome: Outcome,
    },
    Fault(Fault),
}

/// Reply to a manual move override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverrideReply {
    Accepted { fen: String, san: String },
    Rejected,
}

/// The requests the synchronizer makes of the vision service.
#[async_trait]
pub trait VisionService: Send + Sync + 'static {
    /// Probes whether the live board matches the server's position.
    async fn resume(&self, webcam: &str) -> ServiceResult<ResumeReply>;

    /// Fetches the current camera frame.
    async fn continue_frame(&self, webcam: &str) -> ServiceResult<Frame>;

    /// Fetches the move settled since the previous check.
    async fn last_move(&self) -> ServiceResult<LastMoveReply>;

    /// Takes back the latest ply; returns the resulting FEN.
    async fn undo_last_move(&self) -> ServiceResult<String>;

    async fn override_move(&self, uci: &UciMove) -> ServiceResult<OverrideReply>;

    /// Clears server-side game state; returns the starting FEN.
    async fn reset(&self) -> ServiceResult<String>;
}

// *************** Wire Types ***************

#[derive(Deserialize)]
struct ResumeWire {
    error: Option<String>,
    #[serde(default)]
    exact: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorWire {
    Tagged(Vec<String>),
    Bare(String),
}

#[derive(Deserialize)]
struct LastMoveWire {
    error: Option<ErrorWire>,
    fen: Option<String>,
    #[serde(rename = "move")]
    san: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct FenWire {
    fen: String,
}

#[derive(Deserialize)]
struct OverrideWire {
    valid: bool,
    fen: Option<String>,
    san: Option<String>,
}

// *************** Decoding ***************

fn parse<T: DeserializeOwned>(path: &str, body: &[u8]) -> ServiceResult<T> {
    serde_json::from_slice(body).map_err(|e| ServiceError::Decode {
        path: path.to_string(),
        details: e.to_string(),
    })
}

fn missing(path: &str, field: &str) -> ServiceError {
    ServiceError::Decode {
        path: path.to_string(),
        details: format!("missing field `{field}`"),
    }
}

/// Checks FEN syntax. Legality is the service's business.
pub fn check_fen(fen: &str) -> ServiceResult<String> {
    let fen = fen.trim();
    Fen::from_ascii(fen.as_bytes()).map_err(|e| ServiceError::InvalidFen {
        fen: fen.to_string(),
        details: e.to_string(),
    })?;
    Ok(fen.to_string())
}

pub fn decode_resume(body: &[u8]) -> ServiceResult<ResumeReply> {
    let wire: ResumeWire = parse("/resume", body)?;
    Ok(match wire.error {
        None => ResumeReply::Aligned { exact: wire.exact },
        Some(tag) => ResumeReply::Fault(Fault::from_tag(&tag, None)),
    })
}

pub fn decode_last_move(body: &[u8]) -> ServiceResult<LastMoveReply> {
    const PATH: &str = "/lastmove";
    let wire: LastMoveWire = parse(PATH, body)?;

    if let Some(error) = wire.error {
        let fault = match error {
            ErrorWire::Tagged(parts) => match parts.as_slice() {
                [] => Fault::Unknown(String::new()),
                [tag] => Fault::from_tag(tag, None),
                [tag, detail, ..] => Fault::from_tag(tag, Some(detail.as_str())),
            },
            ErrorWire::Bare(tag) => Fault::from_tag(&tag, None),
        };
        return Ok(LastMoveReply::Fault(fault));
    }

    let fen = check_fen(&wire.fen.ok_or_else(|| missing(PATH, "fen"))?)?;
    let status = wire.status.unwrap_or_else(|| Outcome::InProgress.token().to_string());
    let outcome = status.parse::<Outcome>().map_err(|_| ServiceError::Decode {
        path: PATH.to_string(),
        details: format!("unknown game status '{status}'"),
    })?;
    let san = wire.san.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    Ok(LastMoveReply::Settled { fen, san, outcome })
}

pub fn decode_fen(path: &str, body: &[u8]) -> ServiceResult<String> {
    let wire: FenWire = parse(path, body)?;
    check_fen(&wire.fen)
}

pub fn decode_override(body: &[u8]) -> ServiceResult<OverrideReply> {
    const PATH: &str = "/override";
    let wire: OverrideWire = parse(PATH, body)?;
    if !wire.valid {
        return Ok(OverrideReply::Rejected);
    }
    let fen = check_fen(&wire.fen.ok_or_else(|| missing(PATH, "fen"))?)?;
    let san = wire.san.ok_or_else(|| missing(PATH, "san"))?;
    Ok(OverrideReply::Accepted { fen, san })
}

// *************** HTTP Implementation ***************

/// `VisionService` over HTTP GETs against `endpoint_base`.
pub struct HttpVisionService {
    client: Client,
    base: Url,
}

impl HttpVisionService {
    pub fn new(endpoint_base: &str, timeout: Duration) -> ServiceResult<Self> {
        let base = Url::parse(endpoint_base)
            .map_err(|_| ServiceError::BadEndpoint(endpoint_base.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ServiceError::BadEndpoint(endpoint_base.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> ServiceResult<Url> {
        let joined = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|_| ServiceError::BadEndpoint(joined))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> ServiceResult<reqwest::Response> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                path: format!("/{path}"),
                status,
            });
        }
        Ok(response)
    }

    async fn get_body(&self, path: &str, query: &[(&str, &str)]) -> ServiceResult<Vec<u8>> {
        let response = self.get(path, query).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl VisionService for HttpVisionService {
    async fn resume(&self, webcam: &str) -> ServiceResult<ResumeReply> {
        let body = self.get_body("resume", &[("webcam", webcam)]).await?;
        decode_resume(&body)
    }

    async fn continue_frame(&self, webcam: &str) -> ServiceResult<Frame> {
        let response = self.get("continue", &[("webcam", webcam)]).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(Frame::new(bytes.to_vec(), content_type))
    }

    async fn last_move(&self) -> ServiceResult<LastMoveReply> {
        let body = self.get_body("lastmove", &[]).await?;
        decode_last_move(&body)
    }

    async fn undo_last_move(&self) -> ServiceResult<String> {
        let body = self.get_body("undolastmove", &[]).await?;
        decode_fen("/undolastmove", &body)
    }

    async fn override_move(&self, uci: &UciMove) -> ServiceResult<OverrideReply> {
        let uci = uci.to_string();
        let body = self.get_body("override", &[("uci", uci.as_str())]).await?;
        decode_override(&body)
    }

    async fn reset(&self) -> ServiceResult<String> {
        let body = self.get_body("reset", &[]).await?;
        decode_fen("/reset", &body)
    }
}

// *************** Tests ***************
