//! Cosmetic progress for a generation run.
//!
//! Nothing here gates the request loop: tickers only write into the shared
//! [`ProgressSnapshot`] and are torn down with their phase.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};

use crate::types::PipelineStatus;

pub(crate) const PROGRESS_TICK: Duration = Duration::from_millis(100);
pub(crate) const RAMP_TICK: Duration = Duration::from_millis(300);
pub(crate) const RAMP_STEP: u8 = 2;
/// The ramp never reaches 100; only a finished request does.
pub(crate) const RAMP_CAP: u8 = 95;
pub(crate) const COUNTDOWN_TICK: Duration = Duration::from_millis(100);

/// A periodic task owned by a guard. Dropping the guard aborts the task.
pub(crate) struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Calls `tick` every `period`, starting one period from now, until it breaks.
    pub fn spawn<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    break;
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Aborts the task and waits until it is gone, so no tick lands afterwards.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProgressSnapshot {
    pub status: PipelineStatus,
    /// Index of the prompt being processed; equals `total` once the run is over.
    pub current_index: usize,
    pub total: usize,
    /// Synthetic 0-100 progress of the in-flight request.
    pub sub_progress: u8,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
    /// Set only while waiting between two requests.
    pub next_request_in: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> usize {
        self.current_index.min(self.total)
    }

    pub fn overall_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = self.current_index as f64 + f64::from(self.sub_progress) / 100.0;
        (done / self.total as f64 * 100.0).min(100.0)
    }
}

/// Remaining time from the average so far, or from the request delay before
/// anything has completed.
pub(crate) fn estimate_remaining(
    total: usize,
    completed: usize,
    elapsed: Duration,
    request_delay: Duration,
) -> Duration {
    let remaining = saturating_u32(total.saturating_sub(completed));
    let average = if completed > 0 {
        elapsed / saturating_u32(completed)
    } else {
        request_delay.saturating_mul(saturating_u32(completed + 1))
    };
    average.saturating_mul(remaining)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

struct ProgressState {
    snapshot: ProgressSnapshot,
    started_at: Option<Instant>,
    request_delay: Duration,
}

impl ProgressState {
    fn refresh_times(&mut self) {
        let Some(started_at) = self.started_at else {
            return;
        };
        let elapsed = started_at.elapsed();
        let snapshot = &mut self.snapshot;
        snapshot.elapsed = elapsed;
        snapshot.estimated_remaining = estimate_remaining(
            snapshot.total,
            snapshot.completed(),
            elapsed,
            self.request_delay,
        );
    }
}

/// Shared, cloneable handle on the live progress of the pipeline.
#[derive(Clone)]
pub(crate) struct ProgressTracker {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressTracker {
    pub fn new(request_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                snapshot: ProgressSnapshot::default(),
                started_at: None,
                request_delay,
            })),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn status(&self) -> PipelineStatus {
        self.state.lock().snapshot.status
    }

    /// Clears all counters for a freshly loaded prompt set.
    pub fn reset(&self, total: usize) {
        let mut state = self.state.lock();
        state.started_at = None;
        state.snapshot = ProgressSnapshot {
            status: if total > 0 {
                PipelineStatus::Ready
            } else {
                PipelineStatus::Idle
            },
            total,
            ..Default::default()
        };
    }

    /// Enters `Generating` and starts the elapsed/estimate ticker.
    pub fn begin_run(&self, total: usize) -> Ticker {
        {
            let mut state = self.state.lock();
            state.started_at = Some(Instant::now());
            state.snapshot = ProgressSnapshot {
                status: PipelineStatus::Generating,
                total,
                ..Default::default()
            };
            state.refresh_times();
        }
        let state = Arc::clone(&self.state);
        Ticker::spawn(PROGRESS_TICK, move || {
            state.lock().refresh_times();
            ControlFlow::Continue(())
        })
    }

    pub fn begin_item(&self, index: usize) {
        let mut state = self.state.lock();
        state.snapshot.current_index = index;
        state.snapshot.sub_progress = 0;
    }

    pub fn start_ramp(&self) -> Ticker {
        let state = Arc::clone(&self.state);
        let mut progress: u8 = 0;
        Ticker::spawn(RAMP_TICK, move || {
            let mut state = state.lock();
            // A tick racing an abort must not write into a finished run.
            if state.snapshot.status != PipelineStatus::Generating {
                return ControlFlow::Break(());
            }
            progress = progress.saturating_add(RAMP_STEP);
            state.snapshot.sub_progress = progress.min(RAMP_CAP);
            if progress >= RAMP_CAP {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn complete_item(&self) {
        self.state.lock().snapshot.sub_progress = 100;
    }

    pub fn start_countdown(&self, delay: Duration) -> Ticker {
        self.state.lock().snapshot.next_request_in = Some(delay).filter(|d| !d.is_zero());
        let state = Arc::clone(&self.state);
        let mut remaining = delay;
        Ticker::spawn(COUNTDOWN_TICK, move || {
            remaining = remaining.saturating_sub(COUNTDOWN_TICK);
            let mut state = state.lock();
            if state.snapshot.status != PipelineStatus::Generating {
                return ControlFlow::Break(());
            }
            if remaining.is_zero() {
                state.snapshot.next_request_in = None;
                ControlFlow::Break(())
            } else {
                state.snapshot.next_request_in = Some(remaining);
                ControlFlow::Continue(())
            }
        })
    }

    pub fn end_countdown(&self) {
        self.state.lock().snapshot.next_request_in = None;
    }

    /// Marks everything processed and enters `Done`.
    pub fn finish_run(&self) {
        let mut state = self.state.lock();
        state.refresh_times();
        state.started_at = None;
        let snapshot = &mut state.snapshot;
        snapshot.current_index = snapshot.total;
        snapshot.sub_progress = 0;
        snapshot.next_request_in = None;
        snapshot.estimated_remaining = Duration::ZERO;
        snapshot.status = PipelineStatus::Done;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const DELAY: Duration = Duration::from_secs(15);

    #[test]
    fn estimate_before_anything_completes_uses_delay() {
        assert_eq!(
            estimate_remaining(4, 0, Duration::from_secs(3), DELAY),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn estimate_uses_average_of_completed() {
        assert_eq!(
            estimate_remaining(5, 2, Duration::from_secs(40), DELAY),
            Duration::from_secs(60)
        );
        assert_eq!(
            estimate_remaining(5, 5, Duration::from_secs(40), DELAY),
            Duration::ZERO
        );
    }

    #[test]
    fn overall_percentage_includes_sub_progress() {
        let snapshot = ProgressSnapshot {
            current_index: 1,
            total: 4,
            sub_progress: 50,
            ..Default::default()
        };
        assert!((snapshot.overall_percentage() - 37.5).abs() < f64::EPSILON);
        assert_eq!(ProgressSnapshot::default().overall_percentage(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_climbs_in_steps_and_stops_at_cap() {
        let tracker = ProgressTracker::new(DELAY);
        let _run = tracker.begin_run(1);
        tracker.begin_item(0);
        let ramp = tracker.start_ramp();

        time::sleep(Duration::from_millis(950)).await;
        assert_eq!(tracker.snapshot().sub_progress, 6);

        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(tracker.snapshot().sub_progress, RAMP_CAP);
        assert!(ramp.is_finished());

        ramp.stop().await;
        tracker.complete_item();
        assert_eq!(tracker.snapshot().sub_progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn tickers_leave_a_finished_run_alone() {
        let tracker = ProgressTracker::new(DELAY);
        let _run = tracker.begin_run(2);
        tracker.begin_item(0);
        let ramp = tracker.start_ramp();
        let countdown = tracker.start_countdown(Duration::from_secs(5));
        tracker.finish_run();

        time::sleep(Duration::from_secs(1)).await;
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.sub_progress, 0);
        assert_eq!(snapshot.next_request_in, None);
        assert!(ramp.is_finished());
        assert!(countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_down_and_clears() {
        let tracker = ProgressTracker::new(DELAY);
        let _run = tracker.begin_run(2);
        let countdown = tracker.start_countdown(Duration::from_secs(1));
        assert_eq!(tracker.snapshot().next_request_in, Some(Duration::from_secs(1)));

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(
            tracker.snapshot().next_request_in,
            Some(Duration::from_millis(800))
        );

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.snapshot().next_request_in, None);
        countdown.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticker_refreshes_elapsed_and_estimate() {
        let tracker = ProgressTracker::new(DELAY);
        let ticker = tracker.begin_run(3);
        assert_eq!(tracker.status(), PipelineStatus::Generating);

        time::sleep(Duration::from_millis(1050)).await;
        let snapshot = tracker.snapshot();
        assert!(snapshot.elapsed >= Duration::from_secs(1));
        assert_eq!(snapshot.estimated_remaining, DELAY * 3);

        tracker.begin_item(1);
        time::sleep(Duration::from_secs(1)).await;
        let snapshot = tracker.snapshot();
        assert!(snapshot.elapsed >= Duration::from_secs(2));
        assert!(snapshot.elapsed < Duration::from_millis(2100));
        assert_eq!(snapshot.estimated_remaining, snapshot.elapsed * 2);

        ticker.stop().await;
        tracker.finish_run();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, PipelineStatus::Done);
        assert_eq!(snapshot.current_index, 3);
        assert_eq!(snapshot.next_request_in, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticker_stops_ticking() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = Ticker::spawn(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        drop(ticker);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn reset_reflects_loaded_prompts() {
        let tracker = ProgressTracker::new(DELAY);
        tracker.reset(2);
        assert_eq!(tracker.status(), PipelineStatus::Ready);
        tracker.reset(0);
        assert_eq!(tracker.status(), PipelineStatus::Idle);
    }
}
