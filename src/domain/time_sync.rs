//! Keeps the clock on the glasses in step with the phone.

use crate::domain::errors::LinkError;
use crate::domain::models::OutboundMessage;
use crate::domain::ports::MessageSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Source of the current `HH:MM` string.
pub type Clock = fn() -> String;

/// 24-hour `HH:MM`, independent of locale.
pub fn format_hhmm(time: jiff::civil::Time) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

pub fn local_hhmm() -> String {
    format_hhmm(jiff::Zoned::now().time())
}

/// Sends the time once whenever the link becomes ready, then once per
/// interval for as long as it stays ready.
///
/// Readiness is read from a `watch` of the ready link's id (`None` while
/// not ready), so a reconnect that happens between two polls still counts
/// as a new link.
pub struct TimeSyncTicker<S: MessageSink> {
    sink: Arc<S>,
    clock: Clock,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: MessageSink> TimeSyncTicker<S> {
    pub fn spawn(sink: Arc<S>, ready_link: watch::Receiver<Option<u64>>, interval: Duration) -> Self {
        Self::with_clock(sink, ready_link, interval, local_hhmm)
    }

    pub fn with_clock(
        sink: Arc<S>,
        ready_link: watch::Receiver<Option<u64>>,
        interval: Duration,
        clock: Clock,
    ) -> Self {
        let interval = if interval.is_zero() {
            warn!("Zero time sync interval, using {:?}", DEFAULT_SYNC_INTERVAL);
            DEFAULT_SYNC_INTERVAL
        } else {
            interval
        };
        let task = tokio::spawn(run(sink.clone(), ready_link, interval, clock));
        Self {
            sink,
            clock,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Push the current time right away, outside the regular schedule.
    pub async fn sync_now(&self) -> Result<(), LinkError> {
        let hhmm = (self.clock)();
        info!("Manual time sync: {}", hhmm);
        self.sink.send(OutboundMessage::Time { hhmm }).await
    }

    /// Disarm for good.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl<S: MessageSink> Drop for TimeSyncTicker<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<S: MessageSink>(
    sink: Arc<S>,
    mut ready_link: watch::Receiver<Option<u64>>,
    interval: Duration,
    clock: Clock,
) {
    loop {
        let link = match ready_link.wait_for(Option::is_some).await {
            Ok(ready) => *ready,
            Err(_) => return,
        };
        let Some(link) = link else {
            continue;
        };

        info!("Link {} ready, syncing time every {:?}", link, interval);
        // First tick completes immediately.
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => send_time(sink.as_ref(), clock).await,
                changed = ready_link.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let current = *ready_link.borrow_and_update();
                    if current != Some(link) {
                        debug!("Link {} gone, time sync disarmed", link);
                        break;
                    }
                }
            }
        }
    }
}

async fn send_time<S: MessageSink>(sink: &S, clock: Clock) {
    let hhmm = clock();
    match sink.send(OutboundMessage::Time { hhmm: hhmm.clone() }).await {
        Ok(()) => debug!("Time synced: {}", hhmm),
        Err(e) => warn!("Time sync failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::RecordingSink;

    fn fixed_clock() -> String {
        "12:34".to_string()
    }

    const TICK: Duration = Duration::from_secs(60);

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_format_is_zero_padded_24_hour() {
        assert_eq!(format_hhmm(jiff::civil::time(7, 5, 0, 0)), "07:05");
        assert_eq!(format_hhmm(jiff::civil::time(23, 59, 59, 0)), "23:59");
        assert_eq!(format_hhmm(jiff::civil::time(0, 0, 0, 0)), "00:00");
    }

    #[test]
    fn test_local_clock_shape() {
        let now = local_hhmm();
        assert_eq!(now.len(), 5);
        assert_eq!(&now[2..3], ":");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_immediately_then_every_interval() {
        let sink = Arc::new(RecordingSink::default());
        let (state_tx, state_rx) = watch::channel(None);
        let _ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        settle().await;
        assert_eq!(sink.count(), 0);

        state_tx.send(Some(1)).unwrap();
        settle().await;
        assert_eq!(
            sink.sent(),
            vec![OutboundMessage::Time {
                hhmm: "12:34".to_string()
            }]
        );

        time::sleep(TICK).await;
        assert_eq!(sink.count(), 2);
        time::sleep(TICK).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarms_when_link_leaves_ready() {
        let sink = Arc::new(RecordingSink::default());
        let (state_tx, state_rx) = watch::channel(Some(1));
        let _ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        settle().await;
        assert_eq!(sink.count(), 1);

        state_tx.send(None).unwrap();
        time::sleep(TICK * 5).await;
        assert_eq!(sink.count(), 1);

        // Re-arms on the next ready transition.
        state_tx.send(Some(2)).unwrap();
        settle().await;
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disarms() {
        let sink = Arc::new(RecordingSink::default());
        let (_state_tx, state_rx) = watch::channel(Some(1));
        let ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        settle().await;
        ticker.stop();
        time::sleep(TICK * 3).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sends_keep_schedule() {
        let sink = Arc::new(RecordingSink::failing());
        let (_state_tx, state_rx) = watch::channel(Some(1));
        let _ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        time::sleep(TICK * 2 + Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now() {
        let sink = Arc::new(RecordingSink::default());
        let (_state_tx, state_rx) = watch::channel(None);
        let ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        ticker.sync_now().await.unwrap();
        assert_eq!(sink.count(), 1);

        sink.set_failing(true);
        assert_eq!(ticker.sync_now().await, Err(LinkError::LinkNotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_between_polls_syncs_again() {
        let sink = Arc::new(RecordingSink::default());
        let (state_tx, state_rx) = watch::channel(Some(1));
        let _ticker = TimeSyncTicker::with_clock(sink.clone(), state_rx, TICK, fixed_clock);

        settle().await;
        assert_eq!(sink.count(), 1);

        // Drop and reconnect before the ticker task gets to run.
        state_tx.send(None).unwrap();
        state_tx.send(Some(2)).unwrap();
        settle().await;
        assert_eq!(sink.count(), 2);

        // The new link keeps its own schedule.
        time::sleep(TICK).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_uses_default() {
        let sink = Arc::new(RecordingSink::default());
        let (_state_tx, state_rx) = watch::channel(Some(1));
        let _ticker =
            TimeSyncTicker::with_clock(sink.clone(), state_rx, Duration::ZERO, fixed_clock);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count(), 1);
        time::sleep(DEFAULT_SYNC_INTERVAL).await;
        assert_eq!(sink.count(), 2);
    }
}
