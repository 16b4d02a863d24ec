//! Tape ingestion: replaying executed trades paced to wall clock.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use csv::StringRecord;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::TapeTrade;

/// Source of tape trades feeding the driver loop.
///
/// The production implementation replays a tape file; tests script trades
/// directly. Implementations emit onto `sink` until the tape ends, the
/// sink closes, or `cancel` fires.
#[async_trait]
pub trait TapeSource: Send + Sync + 'static {
    async fn start(
        &self,
        reader: Box<dyn Read + Send>,
        sink: mpsc::Sender<TapeTrade>,
        cancel: CancellationToken,
    );
}

/// Replays a delimited tape file.
///
/// The header row names the columns; `<TICKER>`, `<TIME>`, `<LAST>` and
/// `<VOL>` are required, everything else is ignored. Rows are paced so
/// that all trades stamped with one `<TIME>` second go out before the
/// one-second gate opens for the next. Malformed rows are logged and
/// skipped; EOF ends the source cleanly.
#[derive(Debug, Clone)]
pub struct FileTapeSource {
    delimiter: u8,
}

impl FileTapeSource {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for FileTapeSource {
    fn default() -> Self {
        Self::new(b',')
    }
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TapeColumns {
    ticker: usize,
    time: usize,
    last: usize,
    vol: usize,
}

impl TapeColumns {
    fn from_headers(headers: &StringRecord) -> Option<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Some(Self {
            ticker: find("<TICKER>")?,
            time: find("<TIME>")?,
            last: find("<LAST>")?,
            vol: find("<VOL>")?,
        })
    }

    /// Parse one data row; `None` for malformed rows (caller logs and
    /// skips).
    fn parse(&self, record: &StringRecord) -> Option<TapeTrade> {
        Some(TapeTrade {
            ticker: record.get(self.ticker)?.to_string(),
            time: record.get(self.time)?.trim().parse().ok()?,
            price: record.get(self.last)?.trim().parse().ok()?,
            volume: record.get(self.vol)?.trim().parse().ok()?,
        })
    }
}

#[async_trait]
impl TapeSource for FileTapeSource {
    async fn start(
        &self,
        reader: Box<dyn Read + Send>,
        sink: mpsc::Sender<TapeTrade>,
        cancel: CancellationToken,
    ) {
        let mut tape = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(reader);

        let columns = match tape.headers() {
            Ok(headers) => match TapeColumns::from_headers(headers) {
                Some(columns) => columns,
                None => {
                    warn!("tape header is missing a required column, stopping");
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to read tape header");
                return;
            }
        };

        let mut gate = time::interval(Duration::from_secs(1));
        gate.tick().await; // consume the immediate first tick

        let mut current_time: Option<i32> = None;
        let mut emitted = 0u64;
        let mut skipped = 0u64;

        for record in tape.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "unreadable tape row, skipping");
                    skipped += 1;
                    continue;
                }
            };
            let Some(trade) = columns.parse(&record) else {
                warn!(row = ?record, "malformed tape row, skipping");
                skipped += 1;
                continue;
            };

            match current_time {
                None => current_time = Some(trade.time),
                Some(t) if trade.time != t => {
                    // One gate tick per time change, even across
                    // multi-second gaps in the tape.
                    tokio::select! {
                        _ = gate.tick() => {}
                        _ = cancel.cancelled() => {
                            debug!("tape source cancelled");
                            return;
                        }
                    }
                    current_time = Some(t + 1);
                }
                Some(_) => {}
            }

            if sink.send(trade).await.is_err() {
                debug!("tape sink closed, stopping");
                return;
            }
            emitted += 1;
        }

        info!(emitted, skipped, "tape drained");
    }
}

/// Emits a fixed script of trades, unpaced.
///
/// The seam used by tests and demos in place of a tape file; the reader
/// argument is ignored.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTapeSource {
    trades: Vec<TapeTrade>,
    start_delay: Duration,
}

impl ScriptedTapeSource {
    pub fn new(trades: Vec<TapeTrade>) -> Self {
        Self {
            trades,
            start_delay: Duration::ZERO,
        }
    }

    /// Hold the script back for `delay`, giving clients time to subscribe
    /// and place orders before the tape begins.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }
}

#[async_trait]
impl TapeSource for ScriptedTapeSource {
    async fn start(
        &self,
        _reader: Box<dyn Read + Send>,
        sink: mpsc::Sender<TapeTrade>,
        cancel: CancellationToken,
    ) {
        if !self.start_delay.is_zero() {
            tokio::select! {
                _ = time::sleep(self.start_delay) => {}
                _ = cancel.cancelled() => return,
            }
        }
        for trade in self.trades.clone() {
            tokio::select! {
                sent = sink.send(trade) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}
