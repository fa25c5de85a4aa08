use atlas::GenreTags;
use common::ReleaseRecord;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crawler::{CrawlUpdate, ReleaseSource};
use crate::events::{EventBroadcaster, ExplorerEvent};
use crate::explorer::{Explorer, SessionSnapshot};
use crate::ingest::Admission;
use crate::markers::{MapSurface, RenderPass, Viewport};
use crate::playback::AudioOutput;

#[derive(Debug)]
pub enum SessionError {
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Closed => write!(f, "session controller stopped"),
        }
    }
}

impl std::error::Error for SessionError {}

pub enum SessionCommand {
    StartCrawl {
        url: String,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    CrawlFromCurrent {
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Crawl {
        session: Uuid,
        update: CrawlUpdate,
    },
    Toggle {
        key: String,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    MarkerClick {
        key: String,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Next {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Random {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    TrackEnded {
        token: u64,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    AudioFailed {
        token: u64,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    OpenPopup {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    ClosePopup {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    SetViewport {
        viewport: Viewport,
        reply: oneshot::Sender<RenderPass>,
    },
    SetGenres {
        genres: Vec<String>,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Releases {
        reply: oneshot::Sender<Vec<ReleaseRecord>>,
    },
    Tags {
        reply: oneshot::Sender<GenreTags>,
    },
    Map {
        reply: oneshot::Sender<RenderPass>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable front door to the session controller task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// A handle whose controller is already gone.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn start_crawl(&self, url: String) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::StartCrawl { url, reply })
            .await
    }

    pub async fn crawl_from_current(&self) -> Result<Option<SessionSnapshot>, SessionError> {
        self.request(|reply| SessionCommand::CrawlFromCurrent { reply })
            .await
    }

    pub async fn crawl_update(&self, session: Uuid, update: CrawlUpdate) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::Crawl { session, update })
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn toggle(&self, key: String) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Toggle { key, reply }).await
    }

    pub async fn marker_click(&self, key: String) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::MarkerClick { key, reply })
            .await
    }

    pub async fn next(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Next { reply }).await
    }

    pub async fn random(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Random { reply }).await
    }

    pub async fn stop(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn track_ended(&self, token: u64) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::TrackEnded { token, reply })
            .await
    }

    pub async fn audio_failed(&self, token: u64) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::AudioFailed { token, reply })
            .await
    }

    pub async fn open_popup(&self, key: String) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::OpenPopup { key, reply })
            .await
    }

    pub async fn close_popup(&self, key: String) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::ClosePopup { key, reply })
            .await
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> Result<RenderPass, SessionError> {
        self.request(|reply| SessionCommand::SetViewport { viewport, reply })
            .await
    }

    pub async fn set_genres(&self, genres: Vec<String>) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::SetGenres { genres, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn releases(&self) -> Result<Vec<ReleaseRecord>, SessionError> {
        self.request(|reply| SessionCommand::Releases { reply }).await
    }

    pub async fn tags(&self) -> Result<GenreTags, SessionError> {
        self.request(|reply| SessionCommand::Tags { reply }).await
    }

    pub async fn map(&self) -> Result<RenderPass, SessionError> {
        self.request(|reply| SessionCommand::Map { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }
}

struct RunningCrawl {
    session: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the explorer and applies commands to it one at a time.
pub struct SessionController<A, M, S> {
    explorer: Explorer<A, M>,
    source: S,
    events: EventBroadcaster,
    rng: StdRng,
    tx: mpsc::Sender<SessionCommand>,
    crawl: Option<RunningCrawl>,
}

/// Spawns the controller task and returns the handle used to drive it.
pub fn spawn_session<A, M, S>(
    explorer: Explorer<A, M>,
    source: S,
    events: EventBroadcaster,
    rng: StdRng,
    buffer: usize,
) -> (SessionHandle, JoinHandle<()>)
where
    A: AudioOutput + 'static,
    M: MapSurface + 'static,
    S: ReleaseSource,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let controller = SessionController {
        explorer,
        source,
        events,
        rng,
        tx: tx.clone(),
        crawl: None,
    };
    let task = tokio::spawn(controller.run(rx));
    (SessionHandle { tx }, task)
}

impl<A, M, S> SessionController<A, M, S>
where
    A: AudioOutput + 'static,
    M: MapSurface + 'static,
    S: ReleaseSource,
{
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        loop {
            let deadline = self.explorer.next_deadline();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => {
                        let shutdown = matches!(command, SessionCommand::Shutdown { .. });
                        self.handle(command);
                        if shutdown {
                            break;
                        }
                    }
                    None => {
                        self.dispose();
                        break;
                    }
                },
                _ = wait_for(deadline) => {
                    if self.explorer.fire_timers(Instant::now()) {
                        self.publish();
                    }
                }
            }
        }
        info!("Session controller stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        let now = Instant::now();
        match command {
            SessionCommand::StartCrawl { url, reply } => {
                self.start_crawl(url);
                let _ = reply.send(self.publish());
            }
            SessionCommand::CrawlFromCurrent { reply } => {
                let snapshot = self.explorer.current_release_url().map(|url| {
                    self.start_crawl(url);
                    self.publish()
                });
                let _ = reply.send(snapshot);
            }
            SessionCommand::Crawl { session, update } => self.apply_crawl(session, update, now),
            SessionCommand::Toggle { key, reply } => {
                self.explorer.toggle(&key, now);
                let _ = reply.send(self.publish());
            }
            SessionCommand::MarkerClick { key, reply } => {
                self.explorer.marker_click(&key, now);
                let _ = reply.send(self.publish());
            }
            SessionCommand::Next { reply } => {
                self.explorer.play_next(now);
                let _ = reply.send(self.publish());
            }
            SessionCommand::Random { reply } => {
                self.explorer.play_random(now, &mut self.rng);
                let _ = reply.send(self.publish());
            }
            SessionCommand::Stop { reply } => {
                self.explorer.stop();
                let _ = reply.send(self.publish());
            }
            SessionCommand::TrackEnded { token, reply } => {
                self.explorer.track_ended(token, now);
                let _ = reply.send(self.publish());
            }
            SessionCommand::AudioFailed { token, reply } => {
                self.explorer.audio_failed(token);
                let _ = reply.send(self.publish());
            }
            SessionCommand::OpenPopup { key, reply } => {
                let opened = self.explorer.open_popup(&key);
                self.publish();
                let _ = reply.send(opened);
            }
            SessionCommand::ClosePopup { key, reply } => {
                let closed = self.explorer.close_popup(&key);
                self.publish();
                let _ = reply.send(closed);
            }
            SessionCommand::SetViewport { viewport, reply } => {
                self.explorer.set_viewport(viewport);
                let pass = self.explorer.render();
                self.events.broadcast_lossy(ExplorerEvent::Render(pass.clone()));
                let _ = reply.send(pass);
            }
            SessionCommand::SetGenres { genres, reply } => {
                self.explorer.set_genres(genres);
                let _ = reply.send(self.publish());
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.explorer.snapshot());
            }
            SessionCommand::Releases { reply } => {
                let _ = reply.send(self.explorer.releases().to_vec());
            }
            SessionCommand::Tags { reply } => {
                let _ = reply.send(self.explorer.tags());
            }
            SessionCommand::Map { reply } => {
                let pass = match self.explorer.latest_render() {
                    Some(pass) => pass.clone(),
                    None => self.explorer.render(),
                };
                let _ = reply.send(pass);
            }
            SessionCommand::Shutdown { reply } => {
                self.dispose();
                let _ = reply.send(());
            }
        }
    }

    fn start_crawl(&mut self, url: String) {
        self.cancel_crawl();
        let session = Uuid::new_v4();
        self.explorer.start_session(session, url.clone());
        let cancel = CancellationToken::new();
        let task = self
            .source
            .start(session, url, self.tx.clone(), cancel.clone());
        self.crawl = Some(RunningCrawl {
            session,
            cancel,
            task,
        });
    }

    fn cancel_crawl(&mut self) {
        if let Some(crawl) = self.crawl.take() {
            debug!("Cancelling crawl {}", crawl.session);
            crawl.cancel.cancel();
            crawl.task.abort();
        }
    }

    fn apply_crawl(&mut self, session: Uuid, update: CrawlUpdate, now: Instant) {
        match update {
            CrawlUpdate::Title(title) => {
                if self.explorer.set_title(session, title) {
                    self.publish_status();
                }
            }
            CrawlUpdate::Record(record) => {
                match self.explorer.accept_record(session, record, now, &mut self.rng) {
                    Some(Admission::Admit) => {
                        self.publish();
                    }
                    Some(other) => debug!("Record not admitted: {:?}", other),
                    None => {}
                }
            }
            CrawlUpdate::Closed { error } => {
                if self.explorer.stream_closed(session, error) {
                    if let Some(crawl) = &self.crawl {
                        if crawl.session == session {
                            self.crawl = None;
                        }
                    }
                    self.publish_status();
                }
            }
        }
    }

    /// One render pass plus a status update to every listener.
    fn publish(&mut self) -> SessionSnapshot {
        let pass = self.explorer.render();
        self.events.broadcast_lossy(ExplorerEvent::Render(pass));
        self.publish_status()
    }

    fn publish_status(&self) -> SessionSnapshot {
        let snapshot = self.explorer.snapshot();
        self.events
            .broadcast_lossy(ExplorerEvent::Status(snapshot.clone()));
        snapshot
    }

    fn dispose(&mut self) {
        self.cancel_crawl();
        self.explorer.dispose();
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
