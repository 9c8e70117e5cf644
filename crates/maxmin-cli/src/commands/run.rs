use std::io::{self, Write};

use chrono::{Local, TimeZone, Utc};
use maxmin_core::{
    Database, Driver, EngineSettings, Event, Observer, ObserverError, Reading, Result,
    TrackerEngine,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::Context;

/// Prints every engine event as one JSON line.
struct JsonLines<W: Write> {
    out: W,
}

impl<W: Write> Observer for JsonLines<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn on_event(&mut self, event: &Event) -> Result<(), ObserverError> {
        serde_json::to_writer(&mut self.out, event)
            .map_err(|e| ObserverError::new("json-lines", e.to_string()))?;
        writeln!(self.out).map_err(|e| ObserverError::new("json-lines", e.to_string()))?;
        self.out
            .flush()
            .map_err(|e| ObserverError::new("json-lines", e.to_string()))
    }
}

pub fn run(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let settings = config.engine_settings()?;
    let db = ctx.open_db()?;
    let watchdog = config.watchdog_interval();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    match config.time_zone()? {
        Some(tz) => runtime.block_on(track(tz, settings, db, watchdog)),
        None => runtime.block_on(track(Local, settings, db, watchdog)),
    }
}

async fn track<Tz: TimeZone>(
    tz: Tz,
    settings: EngineSettings,
    mut db: Database,
    watchdog: std::time::Duration,
) -> Result<()> {
    let (live_tx, live_rx) = watch::channel::<Option<f64>>(None);
    let (tx, rx) = mpsc::channel(64);

    let mut engine =
        TrackerEngine::new(settings, tz, live_rx).with_observer(JsonLines { out: io::stdout() });

    let now = Utc::now();
    let history = db.load_reset_history()?;
    engine.reconcile_restored(db.load_records()?, &history, now);
    db.clear_reset_history()?;
    engine.start(now);
    db.save_snapshot(&engine.tracked_fields(), &engine.export_records())?;

    tokio::spawn(read_stdin(tx, live_tx));

    let engine = Driver::new(engine, watchdog)
        .run(rx, std::future::pending(), |engine| {
            if let Err(e) = db.save_snapshot(&engine.tracked_fields(), &engine.export_records()) {
                warn!(error = %e, "failed to persist values");
            }
        })
        .await;

    db.save_snapshot(&engine.tracked_fields(), &engine.export_records())?;
    info!("tracking stopped");
    Ok(())
}

/// Forward stdin lines as readings until EOF.
async fn read_stdin(readings: mpsc::Sender<Reading>, live: watch::Sender<Option<f64>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(reading) = Reading::parse_line(&line, Utc::now()) else {
                    continue;
                };
                live.send_replace(reading.value.numeric());
                if readings.send(reading).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        }
    }
}
