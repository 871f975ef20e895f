use crate::config::DeskConfig;
use crate::desk::{Desk, DeskSnapshot, Rearm};
use crate::protocol::DeskButton;
use crate::scheduler::{ScheduledTick, SchedulerStats, TickScheduler};
use crate::transport::{Transport, TransportEvent};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

const TICK_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("desk service is no longer running")]
    Stopped,
}

/// Requests accepted from the presentation side.
#[derive(Debug)]
pub enum DeskRequest {
    Connect,
    Disconnect,
    ToggleButton(DeskButton),
    SaveHeight(DeskButton),
    Snapshot(oneshot::Sender<DeskSnapshot>),
    SchedulerStats(oneshot::Sender<SchedulerStats>),
    Shutdown,
}

enum Input {
    Request(Option<DeskRequest>),
    Event(TransportEvent),
    Tick(ScheduledTick),
}

/// Cloneable command surface for one running [`DeskService`].
#[derive(Debug, Clone)]
pub struct DeskHandle {
    requests: mpsc::Sender<DeskRequest>,
    snapshots: broadcast::Sender<DeskSnapshot>,
}

impl DeskHandle {
    async fn request(&self, request: DeskRequest) -> Result<(), ServiceError> {
        self.requests.send(request).await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn connect(&self) -> Result<(), ServiceError> {
        self.request(DeskRequest::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        self.request(DeskRequest::Disconnect).await
    }

    pub async fn toggle_button(&self, button: DeskButton) -> Result<(), ServiceError> {
        self.request(DeskRequest::ToggleButton(button)).await
    }

    pub async fn save_height(&self, preset: DeskButton) -> Result<(), ServiceError> {
        self.request(DeskRequest::SaveHeight(preset)).await
    }

    pub async fn snapshot(&self) -> Result<DeskSnapshot, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.request(DeskRequest::Snapshot(tx)).await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn scheduler_stats(&self) -> Result<SchedulerStats, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.request(DeskRequest::SchedulerStats(tx)).await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.request(DeskRequest::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskSnapshot> {
        self.snapshots.subscribe()
    }
}

/// Async owner of a [`Desk`].
///
/// Transport events, presentation requests and scheduler ticks are all
/// serialized onto the single task running [`DeskService::run`], so the desk
/// is never mutated concurrently.
pub struct DeskService<T: Transport> {
    desk: Desk<T>,
    scheduler: TickScheduler,
    events: mpsc::Receiver<TransportEvent>,
    requests: mpsc::Receiver<DeskRequest>,
    ticks: mpsc::Receiver<ScheduledTick>,
    snapshots: broadcast::Sender<DeskSnapshot>,
    last_published: Option<DeskSnapshot>,
}

impl<T: Transport + Send + 'static> DeskService<T> {
    pub fn new(desk: Desk<T>, events: mpsc::Receiver<TransportEvent>, config: &DeskConfig) -> (Self, DeskHandle) {
        let (request_tx, request_rx) = mpsc::channel(config.request_capacity);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let (snapshot_tx, _) = broadcast::channel(config.snapshot_capacity);

        let service = Self {
            desk,
            scheduler: TickScheduler::new(tick_tx),
            events,
            requests: request_rx,
            ticks: tick_rx,
            snapshots: snapshot_tx.clone(),
            last_published: None,
        };
        let handle = DeskHandle {
            requests: request_tx,
            snapshots: snapshot_tx,
        };
        (service, handle)
    }

    pub async fn run(mut self) -> Desk<T> {
        info!("desk service started");

        loop {
            let input = tokio::select! {
                request = self.requests.recv() => Input::Request(request),
                Some(event) = self.events.recv() => Input::Event(event),
                Some(tick) = self.ticks.recv() => Input::Tick(tick),
            };

            match input {
                Input::Request(Some(DeskRequest::Shutdown)) | Input::Request(None) => break,
                Input::Request(Some(request)) => self.handle_request(request),
                Input::Event(event) => {
                    let rearm = self.desk.handle_event(event);
                    self.apply(rearm);
                    self.publish(false);
                }
                Input::Tick(tick) => {
                    if self.scheduler.accept(tick) {
                        self.desk.tick();
                        let rearm = self.desk.rearm();
                        self.apply(rearm);
                        self.publish(false);
                    }
                }
            }
        }

        self.scheduler.cancel();
        if self.desk.is_connected() {
            self.desk.disconnect();
        }
        info!("desk service stopped");
        self.desk
    }

    fn handle_request(&mut self, request: DeskRequest) {
        match request {
            DeskRequest::Connect => {
                let rearm = self.desk.connect();
                self.apply(rearm);
            }
            DeskRequest::Disconnect => {
                let rearm = self.desk.disconnect();
                self.apply(rearm);
            }
            DeskRequest::ToggleButton(button) => {
                self.desk.toggle_button(button);
                self.suppress_if_disconnected();
            }
            DeskRequest::SaveHeight(preset) => {
                self.desk.save_height(preset);
                self.suppress_if_disconnected();
            }
            DeskRequest::Snapshot(reply) => {
                let _ = reply.send(self.desk.snapshot());
                return;
            }
            DeskRequest::SchedulerStats(reply) => {
                let _ = reply.send(self.scheduler.get_stats().clone());
                return;
            }
            DeskRequest::Shutdown => return,
        }
        self.publish(true);
    }

    fn suppress_if_disconnected(&mut self) {
        if !self.desk.is_connected() {
            self.scheduler.cancel();
        }
    }

    fn apply(&mut self, rearm: Rearm) {
        match rearm {
            Rearm::Keep => {}
            Rearm::Arm(interval) => self.scheduler.arm(interval),
            Rearm::Cancel => self.scheduler.cancel(),
        }
    }

    fn publish(&mut self, force: bool) {
        let snapshot = self.desk.snapshot();
        if !force && self.last_published.as_ref() == Some(&snapshot) {
            return;
        }
        debug!("publishing {}", snapshot);
        // No subscribers is fine
        let _ = self.snapshots.send(snapshot.clone());
        self.last_published = Some(snapshot);
    }
}
