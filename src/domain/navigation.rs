//! Navigation playback.
//!
//! A [`StepScheduler`] paces an ordered list of [`NavigationStep`]s onto the
//! glasses: the first step goes out as soon as the session starts, then one
//! more step per interval until the list is exhausted or the session is
//! stopped. Cues are advisory, so a failed send is reported and playback
//! carries on.

use crate::domain::errors::NavigationError;
use crate::domain::models::{AppEvent, MessageSeverity, NavigationStep, StatusMessage};
use crate::domain::ports::MessageSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Delay between consecutive cues.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_secs(15);

/// One playback of a route from start to stop or completion.
#[derive(Debug, Clone)]
pub struct NavigationSession {
    steps: Vec<NavigationStep>,
    cursor: usize,
    active: bool,
}

impl NavigationSession {
    pub fn new(steps: Vec<NavigationStep>) -> Result<Self, NavigationError> {
        if steps.is_empty() {
            return Err(NavigationError::EmptySteps);
        }
        Ok(Self {
            steps,
            cursor: 0,
            active: true,
        })
    }

    /// Hand out the step under the cursor and move past it.
    pub fn advance(&mut self) -> Option<(usize, NavigationStep)> {
        if !self.active || self.cursor >= self.steps.len() {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        Some((index, self.steps[index].clone()))
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == self.steps.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

struct Slot {
    generation: u64,
    session: Option<NavigationSession>,
}

pub struct StepScheduler<S: MessageSink> {
    sink: Arc<S>,
    interval: Duration,
    events: mpsc::UnboundedSender<AppEvent>,
    slot: Arc<Mutex<Slot>>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: MessageSink> StepScheduler<S> {
    /// A zero `interval` falls back to [`DEFAULT_STEP_INTERVAL`].
    pub fn new(sink: Arc<S>, interval: Duration, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        let interval = if interval.is_zero() {
            warn!("Zero navigation step interval, using {:?}", DEFAULT_STEP_INTERVAL);
            DEFAULT_STEP_INTERVAL
        } else {
            interval
        };
        Self {
            sink,
            interval,
            events,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                session: None,
            })),
            ticker: std::sync::Mutex::new(None),
        }
    }

    /// Start a new session, replacing any session already running.
    ///
    /// Step 0 is sent before this returns; the remaining steps follow one per
    /// interval.
    pub async fn start(&self, steps: Vec<NavigationStep>) -> Result<(), NavigationError> {
        let mut session = NavigationSession::new(steps)?;
        self.stop().await;

        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        let generation = slot.generation;
        info!(
            "Starting navigation session with {} steps (interval {:?})",
            session.len(),
            self.interval
        );

        emit_next(self.sink.as_ref(), &mut session, &self.events).await;
        if session.is_finished() {
            complete(&mut session, &self.events);
            return Ok(());
        }

        slot.session = Some(session);
        let handle = tokio::spawn(run_ticker(
            self.sink.clone(),
            self.slot.clone(),
            generation,
            self.interval,
            self.events.clone(),
        ));
        *self.ticker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(())
    }

    /// Stop the running session. No cue is sent after this returns.
    ///
    /// Returns whether a session was active; calling it again is a no-op.
    pub async fn stop(&self) -> bool {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }

        let was_active = match slot.session.take() {
            Some(mut session) => {
                session.deactivate();
                true
            }
            None => false,
        };

        if was_active {
            info!("Navigation stopped");
            let _ = self.events.send(AppEvent::NavigationStopped);
        }
        was_active
    }

    pub async fn is_active(&self) -> bool {
        self.slot
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(NavigationSession::is_active)
    }

    /// `(cursor, total)` of the running session.
    pub async fn progress(&self) -> Option<(usize, usize)> {
        self.slot
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| (s.cursor(), s.len()))
    }
}

async fn run_ticker<S: MessageSink>(
    sink: Arc<S>,
    slot: Arc<Mutex<Slot>>,
    generation: u64,
    interval: Duration,
    events: mpsc::UnboundedSender<AppEvent>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut slot = slot.lock().await;
        if slot.generation != generation {
            break;
        }
        let Some(session) = slot.session.as_mut() else {
            break;
        };
        if !session.is_active() {
            break;
        }

        emit_next(sink.as_ref(), session, &events).await;
        if session.is_finished() {
            complete(session, &events);
            slot.session = None;
            break;
        }
    }
}

async fn emit_next<S: MessageSink>(
    sink: &S,
    session: &mut NavigationSession,
    events: &mpsc::UnboundedSender<AppEvent>,
) {
    let Some((index, step)) = session.advance() else {
        return;
    };
    let total = session.len();

    info!(
        "Navigation step {}/{}: {} {} ({})",
        index + 1,
        total,
        step.direction.glyph(),
        step.distance,
        step.instruction
    );

    if let Err(e) = sink.send(step.to_message()).await {
        warn!("Navigation cue {} not delivered: {}", index + 1, e);
        let _ = events.send(AppEvent::LogMessage(StatusMessage::new(
            format!("Navigation cue not delivered: {}", e),
            MessageSeverity::Warning,
        )));
    }

    let _ = events.send(AppEvent::NavigationStep {
        index,
        total,
        instruction: step.instruction,
    });
}

fn complete(session: &mut NavigationSession, events: &mpsc::UnboundedSender<AppEvent>) {
    session.deactivate();
    info!("Navigation complete");
    let _ = events.send(AppEvent::NavigationComplete);
}
