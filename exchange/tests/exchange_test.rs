//! End-to-end tests: a real gRPC client against the service running on a
//! loopback listener, fed by a scripted tape.
//!
//! Each test binds its own ephemeral port, so tests run in parallel
//! without colliding.

use std::time::Duration;

use exchange::proto::exchange_client::ExchangeClient;
use exchange::proto::{BrokerId, Deal, DealId};
use exchange::{ExchangeConfig, ScriptedTapeSource, TapeTrade};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Code;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Five one-lot trades walking the price from 10 to 50, one per second.
fn rising_tape() -> Vec<TapeTrade> {
    [10.0, 20.0, 30.0, 40.0, 50.0]
        .into_iter()
        .enumerate()
        .map(|(i, price)| TapeTrade {
            ticker: "TEST".to_string(),
            time: 100000 + i as i32,
            price,
            volume: 1,
        })
        .collect()
}

fn limit_order(broker_id: i64, price: f32, amount: i32) -> Deal {
    Deal {
        id: 0,
        broker_id,
        ticker: "TEST".to_string(),
        time: 0,
        price,
        amount,
        partial: false,
    }
}

/// Start the exchange on an ephemeral loopback port and connect a client.
/// The scripted tape holds back for half a second so the test can place
/// orders and open streams first.
async fn start_exchange(
    trades: Vec<TapeTrade>,
) -> (ExchangeClient<Channel>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let config = ExchangeConfig {
        listen_addr: addr,
        stats_interval: Duration::from_millis(200),
        tickers: Vec::new(),
    };
    let source = ScriptedTapeSource::new(trades).with_start_delay(Duration::from_millis(500));

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        exchange::serve_with_listener(
            config,
            source,
            Box::new(std::io::empty()),
            listener,
            serve_cancel,
        )
        .await
        .expect("serve");
    });

    let client = ExchangeClient::connect(format!("http://{addr}"))
        .await
        .expect("connect");
    (client, cancel)
}

#[tokio::test]
async fn resting_ask_fills_when_tape_sweeps_through_it() {
    let (mut client, cancel) = start_exchange(rising_tape()).await;

    let mut results = client
        .results(BrokerId { id: 1 })
        .await
        .expect("results stream")
        .into_inner();

    let created = client
        .create(limit_order(1, 25.0, -1))
        .await
        .expect("create")
        .into_inner();
    assert_eq!(created.broker_id, 1);
    assert!(created.id > 0);

    // The 20 -> 30 tick sweeps (20, 30] and lifts the ask at 25.
    let fill = timeout(RECV_TIMEOUT, results.message())
        .await
        .expect("fill within timeout")
        .expect("stream ok")
        .expect("one fill");
    assert_eq!(fill.id, created.id);
    assert_eq!(fill.broker_id, 1);
    assert_eq!(fill.ticker, "TEST");
    assert_eq!(fill.price, 25.0);
    assert_eq!(fill.amount, -1);
    assert!(!fill.partial);

    cancel.cancel();
}

#[tokio::test]
async fn fills_route_to_their_own_broker() {
    let (mut client, cancel) = start_exchange(rising_tape()).await;

    let mut results_1 = client
        .results(BrokerId { id: 1 })
        .await
        .expect("results 1")
        .into_inner();
    let mut results_2 = client
        .results(BrokerId { id: 2 })
        .await
        .expect("results 2")
        .into_inner();

    client.create(limit_order(1, 25.0, -1)).await.expect("create 1");
    client.create(limit_order(2, 35.0, -1)).await.expect("create 2");

    let fill_1 = timeout(RECV_TIMEOUT, results_1.message())
        .await
        .expect("fill 1 within timeout")
        .expect("stream 1 ok")
        .expect("fill 1");
    assert_eq!(fill_1.broker_id, 1);
    assert_eq!(fill_1.price, 25.0);

    let fill_2 = timeout(RECV_TIMEOUT, results_2.message())
        .await
        .expect("fill 2 within timeout")
        .expect("stream 2 ok")
        .expect("fill 2");
    assert_eq!(fill_2.broker_id, 2);
    assert_eq!(fill_2.price, 35.0);

    cancel.cancel();
}

#[tokio::test]
async fn statistics_stream_reaches_every_subscriber() {
    let (mut client, cancel) = start_exchange(rising_tape()).await;

    let mut stats_1 = client
        .statistic(BrokerId { id: 1 })
        .await
        .expect("stats 1")
        .into_inner();
    let mut stats_2 = client
        .statistic(BrokerId { id: 2 })
        .await
        .expect("stats 2")
        .into_inner();

    for stream in [&mut stats_1, &mut stats_2] {
        let bar = timeout(RECV_TIMEOUT, stream.message())
            .await
            .expect("bar within timeout")
            .expect("stream ok")
            .expect("one bar");
        assert_eq!(bar.ticker, "TEST");
        assert!(bar.open >= 10.0);
        assert!(bar.high <= 50.0);
        assert!(bar.low >= 10.0);
        assert!(bar.volume >= 1.0);
    }

    cancel.cancel();
}

#[tokio::test]
async fn create_validates_the_order() {
    let (mut client, cancel) = start_exchange(Vec::new()).await;

    let err = client
        .create(limit_order(1, 25.0, 0))
        .await
        .expect_err("zero amount rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .create(limit_order(1, -5.0, 1))
        .await
        .expect_err("negative price rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut empty_ticker = limit_order(1, 25.0, 1);
    empty_ticker.ticker.clear();
    let err = client
        .create(empty_ticker)
        .await
        .expect_err("empty ticker rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    cancel.cancel();
}

#[tokio::test]
async fn cancel_removes_a_resting_order_once() {
    let (mut client, cancel) = start_exchange(Vec::new()).await;

    let created = client
        .create(limit_order(1, 25.0, -1))
        .await
        .expect("create")
        .into_inner();

    let first = client
        .cancel(created.clone())
        .await
        .expect("cancel")
        .into_inner();
    assert!(first.success);

    let second = client
        .cancel(created)
        .await
        .expect("cancel again")
        .into_inner();
    assert!(!second.success);

    let unknown = client
        .cancel(DealId {
            broker_id: 1,
            id: 424242,
        })
        .await
        .expect("cancel unknown")
        .into_inner();
    assert!(!unknown.success);

    cancel.cancel();
}

#[tokio::test]
async fn cancelled_order_never_fills() {
    let (mut client, cancel) = start_exchange(rising_tape()).await;

    let mut results = client
        .results(BrokerId { id: 1 })
        .await
        .expect("results stream")
        .into_inner();

    let created = client
        .create(limit_order(1, 25.0, -1))
        .await
        .expect("create")
        .into_inner();
    client.cancel(created).await.expect("cancel");

    // The tape sweeps through 25, but the order is gone; shutting down
    // afterwards must end the stream without a fill.
    tokio::time::sleep(Duration::from_millis(800)).await;
    cancel.cancel();

    let end = timeout(Duration::from_secs(1), results.message())
        .await
        .expect("stream settles within a second");
    match end {
        Ok(None) => {}
        Ok(Some(fill)) => panic!("unexpected fill for cancelled order: {fill:?}"),
        Err(status) => assert!(
            matches!(status.code(), Code::Cancelled | Code::Unavailable),
            "unexpected status: {status}"
        ),
    }
}

#[tokio::test]
async fn idle_cancellation_ends_results_stream_quickly() {
    let (mut client, cancel) = start_exchange(Vec::new()).await;

    let mut results = client
        .results(BrokerId { id: 1 })
        .await
        .expect("results stream")
        .into_inner();

    cancel.cancel();

    let end = timeout(Duration::from_secs(1), results.message())
        .await
        .expect("stream ends within a second");
    match end {
        Ok(None) => {}
        Ok(Some(fill)) => panic!("unexpected fill on idle stream: {fill:?}"),
        Err(status) => assert!(
            matches!(status.code(), Code::Cancelled | Code::Unavailable),
            "unexpected status: {status}"
        ),
    }
}
