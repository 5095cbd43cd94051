use crate::engine::{DecisionEngine, EngineSnapshot, Event};
use crate::error::SwitchError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread;
use std::time::Duration;

/// Longest the worker sleeps without a timer due.
const IDLE_WAIT: Duration = Duration::from_secs(1);
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, PartialEq, Eq)]
pub enum EventSendError {
    Full,
    Disconnected,
}

enum RuntimeMessage {
    Event(Event),
    Snapshot(Sender<EngineSnapshot>),
    Shutdown,
}

/// Owns a [`DecisionEngine`] on a dedicated worker thread. Every event,
/// timer fire, and snapshot request is serialized through one channel.
pub struct SwitchRuntime {
    sender: Sender<RuntimeMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SwitchRuntime {
    pub fn spawn(engine: DecisionEngine) -> anyhow::Result<Self> {
        let (tx, rx) = bounded(QUEUE_DEPTH);
        let handle = thread::Builder::new()
            .name("dataswitch-worker".into())
            .spawn(move || runtime_worker(rx, engine))?;

        Ok(Self {
            sender: tx,
            handle: Some(handle),
        })
    }

    pub fn send(&self, event: Event) -> anyhow::Result<()> {
        self.sender
            .send(RuntimeMessage::Event(event))
            .map_err(|_| closed("Failed to send event"))
    }

    pub fn try_send(&self, event: Event) -> Result<(), EventSendError> {
        match self.sender.try_send(RuntimeMessage::Event(event)) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EventSendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(EventSendError::Disconnected),
        }
    }

    /// Round-trip through the worker queue, so every event sent before
    /// is reflected.
    pub fn snapshot(&self) -> anyhow::Result<EngineSnapshot> {
        let (tx, rx) = bounded(1);
        self.sender
            .send(RuntimeMessage::Snapshot(tx))
            .map_err(|_| closed("Failed to request snapshot"))?;
        rx.recv()
            .map_err(|_| closed("Worker dropped snapshot request"))
    }

    pub fn shutdown(&mut self) {
        let _ = self.sender.send(RuntimeMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SwitchRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn closed(context: &'static str) -> anyhow::Error {
    anyhow::Error::new(SwitchError::RuntimeClosed).context(context)
}

fn runtime_worker(rx: Receiver<RuntimeMessage>, mut engine: DecisionEngine) {
    tracing::debug!("switch worker started");
    loop {
        let wait = engine.next_wakeup().map_or(IDLE_WAIT, |d| d.min(IDLE_WAIT));
        match rx.recv_timeout(wait) {
            Ok(msg) => match msg {
                RuntimeMessage::Event(event) => engine.handle(event),
                RuntimeMessage::Snapshot(reply) => {
                    let _ = reply.send(engine.snapshot());
                }
                RuntimeMessage::Shutdown => break,
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        engine.poll_timers();
    }
    tracing::debug!("switch worker stopped");
}
