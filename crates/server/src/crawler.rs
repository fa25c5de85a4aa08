use std::sync::LazyLock;
use std::time::Duration;

use common::ReleaseRecord;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::SessionCommand;

#[derive(Debug)]
pub enum CrawlError {
    Http(reqwest::Error),
    Status(u16),
}

impl std::fmt::Display for CrawlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlError::Http(err) => write!(f, "http error: {}", err),
            CrawlError::Status(status) => write!(f, "stream endpoint returned {}", status),
        }
    }
}

impl std::error::Error for CrawlError {}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        CrawlError::Http(err)
    }
}

/// What a running crawl reports back to the session controller.
#[derive(Debug)]
pub enum CrawlUpdate {
    Title(String),
    Record(ReleaseRecord),
    Closed { error: Option<String> },
}

/// Starts the background task that feeds a session with records.
pub trait ReleaseSource: Send + 'static {
    fn start(
        &self,
        session: Uuid,
        source_url: String,
        tx: mpsc::Sender<SessionCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>;
}

/// The remote crawling service, read as a Server-Sent Events stream.
#[derive(Clone)]
pub struct StreamEndpoint {
    pub client: Client,
    pub endpoint: String,
    pub title_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl ReleaseSource for StreamEndpoint {
    fn start(
        &self,
        session: Uuid,
        source_url: String,
        tx: mpsc::Sender<SessionCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let endpoint = self.clone();
        tokio::spawn(async move {
            run_crawl(endpoint, session, source_url, tx, cancel).await;
        })
    }
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    url: &'a str,
}

async fn run_crawl(
    endpoint: StreamEndpoint,
    session: Uuid,
    source_url: String,
    tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
) {
    let title = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        title = fetch_display_title(&endpoint.client, &source_url, endpoint.title_timeout) => title,
    };
    if !title.is_empty() {
        let update = CrawlUpdate::Title(title);
        if tx.send(SessionCommand::Crawl { session, update }).await.is_err() {
            return;
        }
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Crawl {} cancelled", session);
            return;
        }
        result = stream_records(&endpoint, session, &source_url, &tx) => result,
    };

    let error = match result {
        Ok(count) => {
            info!("Release stream for {} closed after {} records", source_url, count);
            None
        }
        Err(err) => {
            warn!("Release stream for {} failed: {}", source_url, err);
            Some(err.to_string())
        }
    };
    let update = CrawlUpdate::Closed { error };
    let _ = tx.send(SessionCommand::Crawl { session, update }).await;
}

async fn stream_records(
    endpoint: &StreamEndpoint,
    session: Uuid,
    source_url: &str,
    tx: &mpsc::Sender<SessionCommand>,
) -> Result<usize, CrawlError> {
    let response = endpoint
        .client
        .post(&endpoint.endpoint)
        .header(ACCEPT, "text/event-stream")
        .json(&StreamRequest { url: source_url })
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(CrawlError::Status(response.status().as_u16()));
    }

    let mut decoder = SseDecoder::new(endpoint.max_frame_bytes);
    let mut body = response.bytes_stream();
    let mut count = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for payload in decoder.push(&chunk) {
            let record = match parse_payload(&payload) {
                Ok(record) => record,
                Err(err) => {
                    warn!("Skipping malformed release payload: {}", err);
                    continue;
                }
            };
            count += 1;
            let update = CrawlUpdate::Record(record);
            if tx.send(SessionCommand::Crawl { session, update }).await.is_err() {
                return Ok(count);
            }
        }
    }
    Ok(count)
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a blank line ends a frame, so frames and UTF-8
/// sequences may be split across chunks freely. A pending frame larger than
/// `max_frame_bytes` is dropped up to its terminating blank line.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    max_frame_bytes: usize,
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl SseDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Feeds `chunk` and returns the data payloads of every completed frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|&byte| byte != b'\r'));

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(end) = find_frame_end(&self.buffer, self.scanned.max(start)) {
            if self.discarding {
                self.discarding = false;
            } else {
                let frame = String::from_utf8_lossy(&self.buffer[start..end]);
                if let Some(payload) = frame_payload(&frame) {
                    payloads.push(payload);
                }
            }
            start = end + 2;
        }
        self.buffer.drain(..start);
        // A trailing '\n' may pair with the first byte of the next chunk.
        self.scanned = self.buffer.len().saturating_sub(1);

        if self.buffer.len() > self.max_frame_bytes {
            warn!(
                "Dropping event frame larger than {} bytes",
                self.max_frame_bytes
            );
            let ends_with_newline = self.buffer.last() == Some(&b'\n');
            self.buffer.clear();
            if ends_with_newline {
                self.buffer.push(b'\n');
            }
            self.scanned = 0;
            self.discarding = true;
        }
        payloads
    }
}

fn find_frame_end(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|pair| pair == b"\n\n")
        .map(|offset| from + offset)
}

fn frame_payload(frame: &str) -> Option<String> {
    let data: Vec<&str> = frame
        .lines()
        .filter(|line| !line.starts_with(':'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    // Keep-alive payloads look like ": ping".
    if payload.starts_with(':') || payload.trim().is_empty() {
        return None;
    }
    Some(payload)
}

pub fn parse_payload(payload: &str) -> Result<ReleaseRecord, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Display title of a release page, or an empty string on any failure.
pub async fn fetch_display_title(client: &Client, url: &str, timeout: Duration) -> String {
    let response = match client.get(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to fetch release page {}: {}", url, err);
            return String::new();
        }
    };
    match response.text().await {
        Ok(html) => extract_og_title(&html).unwrap_or_default(),
        Err(err) => {
            warn!("Failed to read release page {}: {}", url, err);
            String::new()
        }
    }
}

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta property="og:title" content="([^"]+)""#).expect("og:title pattern")
});

static SITE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\|\s*Bandcamp$").expect("site suffix pattern"));

pub fn extract_og_title(html: &str) -> Option<String> {
    let captures = OG_TITLE.captures(html)?;
    let title = SITE_SUFFIX.replace(&captures[1], "");
    Some(title.trim().to_string())
}
