use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{error, info};

use crate::error::SubmitError;
use crate::packet::PoEPacket;

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_PATH: &str = "/submit-poe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Other => write!(f, "request"),
        }
    }
}

/// Outcome of one delivery attempt. Never retried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Accepted,
    /// The collector answered with something other than 200
    Rejected { status: u16, reason: String },
    /// The request never got an answer
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl SubmissionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionResult::Accepted)
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            SubmissionResult::Accepted => Some(StatusCode::OK.as_u16()),
            SubmissionResult::Rejected { status, .. } => Some(*status),
            SubmissionResult::Transport { .. } => None,
        }
    }
}

impl fmt::Display for SubmissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionResult::Accepted => write!(f, "accepted"),
            SubmissionResult::Rejected { status, reason } => {
                write!(f, "rejected with HTTP {status}: {reason}")
            }
            SubmissionResult::Transport { kind, message } => {
                write!(f, "{kind} error: {message}")
            }
        }
    }
}

/// Posts packets to the collector's `/submit-poe` endpoint.
pub struct Submitter {
    endpoint_url: String,
    client: reqwest::Client,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Submitter {
    pub fn new(oracle_url: &str, timeout: Duration) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint_url: format!("{}{}", oracle_url.trim_end_matches('/'), SUBMIT_PATH),
            client,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub async fn send(&self, packet: &PoEPacket) -> SubmissionResult {
        info!(energy_wh = packet.energy_wh(), "sending PoE packet");

        let result = match self
            .client
            .post(&self.endpoint_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(packet)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => SubmissionResult::Accepted,
            Ok(response) => {
                let status = response.status().as_u16();
                let reason = response.text().await.unwrap_or_default();
                SubmissionResult::Rejected { status, reason }
            }
            Err(e) => SubmissionResult::Transport {
                kind: classify(&e),
                message: e.to_string(),
            },
        };

        if result.is_success() {
            let total = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
            info!(total, "packet submitted successfully");
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            error!(result = %result, "failed to submit packet");
        }
        result
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}
