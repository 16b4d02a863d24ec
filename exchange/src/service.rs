//! The exchange service: driver loop, RPC handlers, and serving.
//!
//! One task owns the driver loop and multiplexes the tape channel, the
//! statistics tick, and cancellation. Each streaming RPC runs its own
//! forwarder task between a bus channel and the client. Cancellation tears
//! down the listener and closes both buses, which ends every live stream.

use std::io::Read;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::book::Dom;
use crate::bus::{DealsBus, StatsBus, SUBSCRIBER_BUFFER};
use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::proto;
use crate::proto::exchange_server::{Exchange, ExchangeServer};
use crate::stats::BarAggregator;
use crate::tape::TapeSource;
use crate::types::{Order, TapeTrade};

/// Depth of the driver's tape input channel.
const TAPE_BUFFER: usize = 256;

/// Shared state behind the four RPC handlers and the driver loop.
///
/// Cloning is cheap; every clone works on the same DOM and buses.
#[derive(Debug, Clone)]
pub struct ExchangeService {
    dom: Arc<Dom>,
    stats: Arc<StatsBus>,
    deals: Arc<DealsBus>,
    config: Arc<ExchangeConfig>,
}

impl ExchangeService {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            dom: Arc::new(Dom::new()),
            stats: Arc::new(StatsBus::new()),
            deals: Arc::new(DealsBus::new()),
            config: Arc::new(config),
        }
    }

    /// The single-task driver: folds tape trades into bars, matches on the
    /// price delta between consecutive trades, publishes fills and
    /// interval statistics. Runs until `cancel` fires, then closes both
    /// buses so every live stream ends.
    async fn run_driver(&self, mut tape_rx: mpsc::Receiver<TapeTrade>, cancel: CancellationToken) {
        let mut aggregator = BarAggregator::new();
        let mut prev: Option<TapeTrade> = None;
        let mut stats_tick = time::interval(self.config.stats_interval);
        stats_tick.tick().await; // consume the immediate first tick
        let mut tape_open = true;

        loop {
            tokio::select! {
                trade = tape_rx.recv(), if tape_open => match trade {
                    Some(trade) => {
                        aggregator.update(&trade);
                        if let Some(prev) = &prev {
                            let delta = trade.price - prev.price;
                            if let Some(fill) = self.dom.execute_best(delta, &trade) {
                                info!(
                                    id = fill.id,
                                    broker = fill.broker_id,
                                    price = fill.price,
                                    amount = fill.amount,
                                    partial = fill.partial,
                                    "order executed"
                                );
                                self.deals.publish(&fill).await;
                            }
                        }
                        prev = Some(trade);
                    }
                    None => {
                        info!("tape exhausted, statistics continue");
                        tape_open = false;
                    }
                },
                _ = stats_tick.tick() => {
                    for bar in aggregator.drain() {
                        if self.config.broadcasts(&bar.ticker) {
                            self.stats.publish(&bar).await;
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.stats.close_all();
        self.deals.close_all();
    }
}

#[tonic::async_trait]
impl Exchange for ExchangeService {
    type StatisticStream = ReceiverStream<std::result::Result<proto::Ohlcv, Status>>;

    async fn statistic(
        &self,
        _request: Request<proto::BrokerId>,
    ) -> std::result::Result<Response<Self::StatisticStream>, Status> {
        let (subscriber, mut bars) = self.stats.subscribe();
        debug!(subscriber, "statistic stream opened");

        let stats = Arc::clone(&self.stats);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    bar = bars.recv() => match bar {
                        Some(bar) => {
                            if tx.send(Ok(proto::Ohlcv::from(bar))).await.is_err() {
                                break;
                            }
                        }
                        None => break, // bus closed
                    },
                    // Client went away (disconnect or deadline) while we
                    // were blocked on the bus.
                    _ = tx.closed() => break,
                }
            }
            stats.unsubscribe(subscriber);
            debug!(subscriber, "statistic stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn create(
        &self,
        request: Request<proto::Deal>,
    ) -> std::result::Result<Response<proto::DealId>, Status> {
        let deal = request.into_inner();
        if deal.ticker.is_empty() {
            return Err(Status::invalid_argument("ticker must not be empty"));
        }
        if !deal.price.is_finite() || deal.price <= 0.0 {
            return Err(Status::invalid_argument("price must be positive"));
        }
        if deal.amount == 0 {
            return Err(Status::invalid_argument("amount must not be zero"));
        }

        let broker_id = deal.broker_id;
        let id = self.dom.add(Order::from(deal));
        debug!(id, broker = broker_id, "order resting");
        Ok(Response::new(proto::DealId { broker_id, id }))
    }

    async fn cancel(
        &self,
        request: Request<proto::DealId>,
    ) -> std::result::Result<Response<proto::CancelResult>, Status> {
        let deal_id = request.into_inner();
        let success = self.dom.cancel(deal_id.broker_id, deal_id.id);
        debug!(id = deal_id.id, broker = deal_id.broker_id, success, "cancel");
        Ok(Response::new(proto::CancelResult { success }))
    }

    type ResultsStream = ReceiverStream<std::result::Result<proto::Deal, Status>>;

    async fn results(
        &self,
        request: Request<proto::BrokerId>,
    ) -> std::result::Result<Response<Self::ResultsStream>, Status> {
        let broker_id = request.into_inner().id;
        let (token, mut fills) = self.deals.subscribe(broker_id);
        debug!(broker = broker_id, "results stream opened");

        let deals = Arc::clone(&self.deals);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    fill = fills.recv() => match fill {
                        Some(fill) => {
                            if tx.send(Ok(proto::Deal::from(fill))).await.is_err() {
                                break;
                            }
                        }
                        None => break, // bus closed or subscription replaced
                    },
                    // Client went away (disconnect or deadline) while we
                    // were blocked on the bus.
                    _ = tx.closed() => break,
                }
            }
            deals.unsubscribe(broker_id, token);
            debug!(broker = broker_id, "results stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Bind `config.listen_addr` and run the exchange until `cancel` fires.
///
/// A bind failure is fatal and reported to the caller; everything after a
/// successful bind runs until cancellation.
pub async fn serve<S: TapeSource>(
    config: ExchangeConfig,
    source: S,
    reader: Box<dyn Read + Send>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| ExchangeError::Bind {
            addr: config.listen_addr,
            source: e,
        })?;
    serve_with_listener(config, source, reader, listener, cancel).await
}

/// As [`serve`], with a pre-bound listener.
///
/// Tests bind `127.0.0.1:0` themselves and read the local address back.
pub async fn serve_with_listener<S: TapeSource>(
    config: ExchangeConfig,
    source: S,
    reader: Box<dyn Read + Send>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let service = ExchangeService::new(config);

    let (tape_tx, tape_rx) = mpsc::channel(TAPE_BUFFER);
    let source_cancel = cancel.clone();
    tokio::spawn(async move {
        source.start(reader, tape_tx, source_cancel).await;
    });

    let server =
        tonic::transport::Server::builder().add_service(ExchangeServer::new(service.clone()));
    let shutdown = cancel.clone();
    let serve_fut = server.serve_with_incoming_shutdown(
        TcpListenerStream::new(listener),
        async move { shutdown.cancelled().await },
    );

    info!(%addr, "exchange listening");
    let (served, ()) = tokio::join!(serve_fut, service.run_driver(tape_rx, cancel));
    served?;
    info!("exchange stopped");
    Ok(())
}
