//! Price-indexed, time-prioritised order book.
//!
//! Three layers, smallest first:
//!
//! - [`DealQueue`]: FIFO of resting orders at one price.
//! - [`Ladder`]: all levels for one ticker on one side, backed by a
//!   `BTreeMap` keyed on [`OrderedFloat`] prices for free sorted iteration.
//! - [`Book`]: one side across all tickers behind a single mutex, with an
//!   id index for cancellation.
//!
//! [`Dom`] pairs the two sides and is the public entry point: brokers add
//! and cancel through it, the driver matches through it.
//!
//! A level is removed as soon as its queue empties, so every present level
//! is matchable and an add-then-cancel leaves the book exactly as it was.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::types::{Order, TapeTrade};

type Price = OrderedFloat<f32>;

/// Which half of the book a ladder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Resting buys, `amount > 0`.
    Bid,
    /// Resting sells, `amount < 0`.
    Ask,
}

/// FIFO queue of resting orders at a single price level.
#[derive(Debug, Default)]
struct DealQueue(VecDeque<Order>);

impl DealQueue {
    fn enqueue(&mut self, order: Order) {
        self.0.push_back(order);
    }

    fn head_mut(&mut self) -> Option<&mut Order> {
        self.0.front_mut()
    }

    fn dequeue(&mut self) -> Option<Order> {
        self.0.pop_front()
    }

    /// O(n); only cancellation walks the queue.
    fn remove(&mut self, id: i64, broker_id: i64) -> bool {
        match self
            .0
            .iter()
            .position(|o| o.id == id && o.broker_id == broker_id)
        {
            Some(pos) => {
                self.0.remove(pos);
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Price levels for one ticker on one side, ascending by price.
#[derive(Debug, Default)]
struct Ladder {
    levels: BTreeMap<Price, DealQueue>,
}

impl Ladder {
    fn enqueue(&mut self, order: Order) {
        self.levels
            .entry(OrderedFloat(order.price))
            .or_default()
            .enqueue(order);
    }

    /// Lowest (`from_top = false`) or highest (`from_top = true`) level
    /// price within `bounds`. Empty levels never exist, so any hit is
    /// matchable.
    fn best_in(&self, bounds: (Bound<Price>, Bound<Price>), from_top: bool) -> Option<Price> {
        let mut range = self.levels.range(bounds);
        let entry = if from_top {
            range.next_back()
        } else {
            range.next()
        };
        entry.map(|(price, _)| *price)
    }

    /// Execute against the head order of the level at `price`.
    ///
    /// Partial fill iff the head's remaining amount exceeds the incoming
    /// volume: the head stays queued with its amount reduced toward zero
    /// and the returned copy carries the matched quantity. Otherwise the
    /// head is dequeued and returned whole. The second tuple field reports
    /// whether the order left the book.
    fn execute_at(&mut self, price: Price, volume: i32) -> Option<(Order, bool)> {
        let queue = self.levels.get_mut(&price)?;
        let head = queue.head_mut()?;

        if head.amount.abs() > volume.abs() {
            let matched = volume.abs();
            head.amount += if head.amount < 0 { matched } else { -matched };
            head.partial = true;
            let mut fill = head.clone();
            fill.amount = matched;
            return Some((fill, false));
        }

        let fill = queue.dequeue()?;
        if queue.is_empty() {
            self.levels.remove(&price);
        }
        Some((fill, true))
    }

    fn remove(&mut self, price: Price, id: i64, broker_id: i64) -> bool {
        let Some(queue) = self.levels.get_mut(&price) else {
            return false;
        };
        let removed = queue.remove(id, broker_id);
        if queue.is_empty() {
            self.levels.remove(&price);
        }
        removed
    }

    fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// One side of the depth-of-market: every ticker's ladder plus the id
/// index used by cancellation, all behind one mutex.
#[derive(Debug)]
struct Book {
    side: Side,
    inner: Mutex<BookInner>,
}

#[derive(Debug, Default)]
struct BookInner {
    ladders: HashMap<String, Ladder>,
    /// Order id -> (ticker, level price); kept in lockstep with the ladders.
    index: HashMap<i64, (String, Price)>,
}

impl Book {
    fn new(side: Side) -> Self {
        Self {
            side,
            inner: Mutex::new(BookInner::default()),
        }
    }

    /// Insert a resting order that already carries its assigned id.
    fn add(&self, order: Order) {
        debug_assert_eq!(order.amount > 0, self.side == Side::Bid);
        let mut inner = self.inner.lock();
        inner
            .index
            .insert(order.id, (order.ticker.clone(), OrderedFloat(order.price)));
        inner
            .ladders
            .entry(order.ticker.clone())
            .or_default()
            .enqueue(order);
    }

    /// Match the best resting order for `ticker` with a price in `bounds`,
    /// scanning from the bottom or the top of the ladder.
    fn execute_in_range(
        &self,
        bounds: (Bound<Price>, Bound<Price>),
        ticker: &str,
        volume: i32,
        from_top: bool,
    ) -> Option<Order> {
        let mut inner = self.inner.lock();
        let (fill, removed, ladder_empty) = {
            let ladder = inner.ladders.get_mut(ticker)?;
            let price = ladder.best_in(bounds, from_top)?;
            let (fill, removed) = ladder.execute_at(price, volume)?;
            (fill, removed, ladder.is_empty())
        };
        if removed {
            inner.index.remove(&fill.id);
        }
        if ladder_empty {
            inner.ladders.remove(ticker);
        }
        Some(fill)
    }

    /// Lowest-priced match with price in `(lo, hi]`.
    fn execute_min_in_range(&self, lo: f32, hi: f32, ticker: &str, volume: i32) -> Option<Order> {
        let bounds = (
            Bound::Excluded(OrderedFloat(lo)),
            Bound::Included(OrderedFloat(hi)),
        );
        self.execute_in_range(bounds, ticker, volume, false)
    }

    /// Highest-priced match with price in `[lo, hi)`.
    fn execute_max_in_range(&self, lo: f32, hi: f32, ticker: &str, volume: i32) -> Option<Order> {
        let bounds = (
            Bound::Included(OrderedFloat(lo)),
            Bound::Excluded(OrderedFloat(hi)),
        );
        self.execute_in_range(bounds, ticker, volume, true)
    }

    /// Remove a resting order by id. `false` if the id is unknown here or
    /// belongs to a different broker.
    fn remove(&self, broker_id: i64, id: i64) -> bool {
        let mut inner = self.inner.lock();
        let Some((ticker, price)) = inner.index.get(&id).cloned() else {
            return false;
        };
        let (removed, ladder_empty) = {
            let Some(ladder) = inner.ladders.get_mut(&ticker) else {
                return false;
            };
            (ladder.remove(price, id, broker_id), ladder.is_empty())
        };
        if removed {
            inner.index.remove(&id);
            if ladder_empty {
                inner.ladders.remove(&ticker);
            }
        }
        removed
    }
}

/// Depth-of-market: the bid and ask books for every ticker, plus the
/// service-wide order id counter.
#[derive(Debug)]
pub struct Dom {
    bids: Book,
    asks: Book,
    next_id: AtomicI64,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        Self {
            bids: Book::new(Side::Bid),
            asks: Book::new(Side::Ask),
            next_id: AtomicI64::new(0),
        }
    }

    /// Add a resting order, routed by the sign of `amount`.
    ///
    /// Returns the exchange-assigned id: unique service-wide and strictly
    /// increasing across calls. The caller has already validated that
    /// `amount` is non-zero and the price positive.
    pub fn add(&self, mut order: Order) -> i64 {
        debug_assert_ne!(order.amount, 0);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        order.id = id;
        order.partial = false;
        if order.amount > 0 {
            self.bids.add(order);
        } else {
            self.asks.add(order);
        }
        id
    }

    /// Match at most one resting order against a tape trade, given the
    /// price delta from the previous trade.
    ///
    /// An up-tick sweeps the asks in `(prev, price]` and fills the lowest;
    /// a down-tick sweeps the bids in `[price, prev)` and fills the
    /// highest. The previous tape price itself is excluded on both sides.
    /// Within a level the oldest order fills first; unfilled tape volume
    /// is not carried over to other levels.
    pub fn execute_best(&self, delta: f32, trade: &TapeTrade) -> Option<Order> {
        if delta > 0.0 {
            self.asks.execute_min_in_range(
                trade.price - delta,
                trade.price,
                &trade.ticker,
                trade.volume,
            )
        } else if delta < 0.0 {
            self.bids.execute_max_in_range(
                trade.price,
                trade.price - delta,
                &trade.ticker,
                trade.volume,
            )
        } else {
            None
        }
    }

    /// Remove a resting order. `true` iff an order with this id belonging
    /// to this broker was resting on either side.
    pub fn cancel(&self, broker_id: i64, id: i64) -> bool {
        self.bids.remove(broker_id, id) || self.asks.remove(broker_id, id)
    }
}
