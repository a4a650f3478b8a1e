//! Detection feed: the polled JSON document and the HTTP poller.
//!
//! Requests go out on a worker thread so a slow backend never stalls the
//! render loop. Responses are queued and picked up by the coordinator,
//! which ingests each one in full before the next render tick.

use crate::error::FeedError;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDetection {
    pub common_name: String,
    /// 0–1.
    pub confidence: f64,
    /// Seconds into the analyzed recording.
    pub start: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedDocument {
    pub detections: Vec<FeedDetection>,
    /// How far the analyzed recording lags behind live audio, in seconds.
    pub delay: f64,
    pub file_name: String,
}

pub fn parse_document(text: &str) -> Result<FeedDocument, FeedError> {
    serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))
}

/// Source of detection documents. `request` must not block; the answer
/// arrives later through `try_response`.
pub trait DetectionFeed: Send {
    fn request(&mut self, last_file: Option<&str>);
    fn try_response(&mut self) -> Option<Result<FeedDocument, FeedError>>;
}

// ─── HTTP poller ────────────────────────────────────────────────────────────

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpFeed {
    req_tx: Sender<Option<String>>,
    resp_rx: Receiver<Result<FeedDocument, FeedError>>,
    in_flight: bool,
}

impl HttpFeed {
    /// Spawn the worker thread for `url`.
    pub fn spawn(url: String) -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let (req_tx, req_rx) = bounded::<Option<String>>(1);
        let (resp_tx, resp_rx) = bounded(4);

        thread::Builder::new()
            .name("feed-poll".into())
            .spawn(move || {
                info!("Detection feed → {}", url);
                for last_file in req_rx.iter() {
                    let result = fetch(&client, &url, last_file.as_deref());
                    if resp_tx.send(result).is_err() {
                        break;
                    }
                }
                info!("Detection feed worker shutting down");
            })
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            req_tx,
            resp_rx,
            in_flight: false,
        })
    }
}

fn fetch(
    client: &reqwest::blocking::Client,
    url: &str,
    last_file: Option<&str>,
) -> Result<FeedDocument, FeedError> {
    let mut req = client.get(url);
    if let Some(name) = last_file {
        req = req.query(&[("last_file", name)]);
    }
    let resp = req
        .send()
        .map_err(|e| FeedError::Transport(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Status(status.as_u16()));
    }
    let body = resp
        .text()
        .map_err(|e| FeedError::Transport(e.to_string()))?;
    parse_document(&body)
}

impl DetectionFeed for HttpFeed {
    fn request(&mut self, last_file: Option<&str>) {
        if self.in_flight {
            debug!("Feed poll skipped: previous request still in flight");
            return;
        }
        match self.req_tx.try_send(last_file.map(str::to_string)) {
            Ok(()) => self.in_flight = true,
            Err(e) => warn!("Feed worker unavailable: {}", e),
        }
    }

    fn try_response(&mut self) -> Option<Result<FeedDocument, FeedError>> {
        match self.resp_rx.try_recv() {
            Ok(r) => {
                self.in_flight = false;
                Some(r)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if self.in_flight {
                    self.in_flight = false;
                    Some(Err(FeedError::Disconnected))
                } else {
                    None
                }
            }
        }
    }
}
