//! Per-ticker OHLCV accumulation over one statistics interval.

use std::collections::HashMap;
use std::mem;

use crate::proto;
use crate::types::TapeTrade;

/// One interval's aggregate for a single ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub ticker: String,
    /// First trade price of the interval; `-1.0` until a trade arrives.
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    /// Sum of absolute trade volumes.
    pub volume: f32,
}

impl Bar {
    fn new(ticker: String) -> Self {
        Self {
            ticker,
            open: -1.0,
            high: f32::NEG_INFINITY,
            low: f32::INFINITY,
            close: -1.0,
            volume: 0.0,
        }
    }
}

impl From<Bar> for proto::Ohlcv {
    fn from(bar: Bar) -> Self {
        Self {
            ticker: bar.ticker,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

/// Accumulates bars between drains.
///
/// Mutated only by the driver task, so it carries no lock.
#[derive(Debug, Default)]
pub struct BarAggregator {
    bars: HashMap<String, Bar>,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tape trade into its ticker's bar.
    pub fn update(&mut self, trade: &TapeTrade) {
        let bar = self
            .bars
            .entry(trade.ticker.clone())
            .or_insert_with(|| Bar::new(trade.ticker.clone()));
        if bar.open < 0.0 {
            bar.open = trade.price;
        }
        bar.high = bar.high.max(trade.price);
        bar.low = bar.low.min(trade.price);
        bar.volume += trade.volume.abs() as f32;
        bar.close = trade.price;
    }

    /// Snapshot the tickers traded since the previous drain and reset.
    ///
    /// Draining twice in a row yields an empty snapshot.
    pub fn drain(&mut self) -> Vec<Bar> {
        mem::take(&mut self.bars).into_values().collect()
    }
}
