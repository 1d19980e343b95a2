//! Delivery of scan events to the host environment.
//!
//! The coordinator never calls into the consumer directly. It pushes
//! `ScanEvent`s into a channel and a single dispatcher task drains them
//! into a `ScanObserver`, one at a time and in emission order.
use crate::types::{ConnectionState, DiscoveredHost, ScanEvent, ScanSummary};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub type EventSender = mpsc::UnboundedSender<ScanEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ScanEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send an event, tolerating a consumer that has already gone away.
pub(crate) fn emit(events: &EventSender, event: ScanEvent) {
    if events.send(event).is_err() {
        debug!("event consumer dropped; discarding event");
    }
}

/// Callback surface of the host environment. Every method defaults to a
/// no-op so consumers only implement what they render.
pub trait ScanObserver: Send {
    fn on_state_changed(&mut self, _state: ConnectionState) {}
    fn on_progress(&mut self) {}
    fn on_host_discovered(&mut self, _host: DiscoveredHost) {}
    fn on_scan_complete(&mut self, _summary: ScanSummary) {}

    fn deliver(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::StateChanged { state } => self.on_state_changed(state),
            ScanEvent::Progress => self.on_progress(),
            ScanEvent::HostDiscovered { host } => self.on_host_discovered(host),
            ScanEvent::ScanComplete { summary } => self.on_scan_complete(summary),
        }
    }
}

/// Drain `rx` into `observer` until every sender is dropped, then hand
/// the observer back.
pub fn spawn_dispatcher<O>(mut rx: EventReceiver, mut observer: O) -> JoinHandle<O>
where
    O: ScanObserver + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            observer.deliver(event);
        }
        observer
    })
}

/// Keeps every event it sees.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub events: Vec<ScanEvent>,
}

impl RecordingObserver {
    pub fn hosts(&self) -> Vec<DiscoveredHost> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::HostDiscovered { host } => Some(host.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn progress_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Progress))
            .count()
    }

    pub fn completions(&self) -> Vec<ScanSummary> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::ScanComplete { summary } => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ScanObserver for RecordingObserver {
    fn deliver(&mut self, event: ScanEvent) {
        self.events.push(event);
    }
}
