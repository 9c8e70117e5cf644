//! Async driver for a [`TrackerEngine`].
//!
//! The engine itself is a synchronous state machine. The driver owns it and
//! serializes every entry point on one task: inbound readings, the earliest
//! pending reset timer, the periodic watchdog and shutdown.

use std::future::{self, Future};
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::reading::{Reading, ReadingSource};
use crate::tracker::TrackerEngine;

/// Source of wall-clock time for the driver.
pub type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Owns an engine and drives it from tokio.
pub struct Driver<Tz: TimeZone, S: ReadingSource> {
    engine: TrackerEngine<Tz, S>,
    clock: Clock,
    watchdog_interval: StdDuration,
}

impl<Tz: TimeZone, S: ReadingSource> Driver<Tz, S> {
    pub fn new(engine: TrackerEngine<Tz, S>, watchdog_interval: StdDuration) -> Self {
        Self {
            engine,
            clock: Box::new(Utc::now),
            watchdog_interval: watchdog_interval.max(StdDuration::from_secs(1)),
        }
    }

    /// Replace the wall clock (tests pair this with a paused tokio clock).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn engine(&self) -> &TrackerEngine<Tz, S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TrackerEngine<Tz, S> {
        &mut self.engine
    }

    /// Run until `shutdown` completes or the reading channel closes.
    ///
    /// `on_change` is called after every step that mutated the engine.
    /// All timers are cancelled before the engine is handed back.
    pub async fn run<F>(
        self,
        mut readings: mpsc::Receiver<Reading>,
        shutdown: impl Future<Output = ()>,
        mut on_change: F,
    ) -> TrackerEngine<Tz, S>
    where
        F: FnMut(&TrackerEngine<Tz, S>),
    {
        let Driver {
            mut engine,
            clock,
            watchdog_interval,
        } = self;

        let mut watchdog = time::interval_at(Instant::now() + watchdog_interval, watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            let deadline = engine.next_due().map(|due| deadline_for(due, clock()));
            let timer = async move {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                reading = readings.recv() => match reading {
                    Some(reading) => {
                        if engine.apply_reading(&reading) {
                            on_change(&engine);
                        }
                    }
                    None => {
                        debug!("reading channel closed");
                        break;
                    }
                },
                () = timer => {
                    if engine.tick(clock()) > 0 {
                        on_change(&engine);
                    }
                }
                _ = watchdog.tick() => {
                    if engine.check_watchdog(clock()) > 0 {
                        on_change(&engine);
                    }
                }
            }
        }

        engine.shutdown();
        engine
    }
}

/// Tokio instant at which the wall-clock `due` is reached.
fn deadline_for(due: DateTime<Utc>, now: DateTime<Utc>) -> Instant {
    let wait = (due - now).to_std().unwrap_or(StdDuration::ZERO);
    Instant::now() + wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{Field, PeriodKind};
    use crate::tracker::EngineSettings;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::sync::{oneshot, watch};

    type Engine = TrackerEngine<Utc, watch::Receiver<Option<f64>>>;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 23, 59, 30).unwrap()
    }

    /// Wall clock that advances with the paused tokio clock.
    fn paused_clock() -> impl Fn() -> DateTime<Utc> + Clone {
        let origin = Instant::now();
        move || {
            let elapsed = chrono::Duration::from_std(origin.elapsed());
            base() + elapsed.unwrap_or_else(|_| chrono::Duration::zero())
        }
    }

    fn engine(live: f64) -> (Engine, watch::Sender<Option<f64>>) {
        let (tx, rx) = watch::channel(Some(live));
        (TrackerEngine::new(EngineSettings::default(), Utc, rx), tx)
    }

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn readings_and_timer_drive_the_engine() {
        let clock = paused_clock();
        let (mut engine, live) = engine(5.0);
        engine.start(clock());

        let (tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let changes = Rc::new(Cell::new(0));
        let seen = Rc::clone(&changes);

        let driver = Driver::new(engine, StdDuration::from_secs(3600)).with_clock(clock.clone());
        let feed = async {
            live.send_replace(Some(9.0));
            tx.send(Reading::new(9.0, clock())).await.unwrap();
            time::sleep(StdDuration::from_secs(60)).await;
            stop_tx.send(()).unwrap();
        };
        let run = driver.run(rx, async { stop_rx.await.unwrap_or(()) }, move |_| {
            seen.set(seen.get() + 1);
        });

        let (engine, ()) = tokio::join!(run, feed);
        assert_eq!(changes.get(), 2);

        let last_reset = engine.last_reset(PeriodKind::Daily).unwrap();
        assert!(last_reset >= midnight());
        assert!(last_reset < midnight() + chrono::Duration::seconds(1));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(9.0));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Start), Some(9.0));
        assert!(engine.next_due().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_recovers_lost_timer() {
        let clock = paused_clock();
        let (mut engine, _live) = engine(3.0);
        engine.start(clock());
        engine.shutdown();

        let (_tx, rx) = mpsc::channel::<Reading>(1);
        let driver = Driver::new(engine, StdDuration::from_secs(60)).with_clock(clock);
        let stop = time::sleep(StdDuration::from_secs(90));

        let engine = driver.run(rx, stop, |_| {}).await;
        let last_reset = engine.last_reset(PeriodKind::Daily).unwrap();
        assert!(last_reset >= midnight());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_stops_the_driver() {
        let (mut engine, _live) = engine(1.0);
        engine.start(base());

        let (tx, rx) = mpsc::channel::<Reading>(1);
        drop(tx);
        let engine = Driver::new(engine, StdDuration::from_secs(60))
            .with_clock(paused_clock())
            .run(rx, future::pending(), |_| {})
            .await;
        assert!(engine.scheduler().next_due().is_none());
    }
}
