//! Pool acquisition/release and cancellation scenarios.

mod support;

use std::time::Duration;

use xrpc::pool::PoolConfig;
use xrpc::DriverError;

#[tokio::test]
async fn saturated_pool_times_out_then_reuses_on_release() {
    let addr = support::spawn_fake_server().await;
    let target = support::target(addr);
    let pool = support::pool_with(
        PoolConfig::default()
            .with_max_transports_per_target(1)
            .with_max_sessions_per_transport(1)
            .with_acquire_timeout(Duration::from_millis(50)),
    );

    let first = pool.acquire(target.clone()).await.unwrap();

    let started = std::time::Instant::now();
    let second = pool.acquire(target.clone()).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(second, Err(DriverError::AcquireTimeout { .. })));

    first.close().await.unwrap();

    // The just-released Session is handed straight back out of the idle
    // queue rather than opening a second Transport.
    let third = pool.acquire(target.clone()).await.unwrap();
    third.close().await.unwrap();
}

#[tokio::test]
async fn cancel_terminates_the_in_flight_query_with_an_error() {
    let addr = support::spawn_fake_server().await;
    let target = support::target(addr);
    let pool = support::pool_with(PoolConfig::default());

    let handle = pool.acquire(target).await.unwrap();
    handle.init(0).await.unwrap();

    let query = handle.exec_query("BLOCK UNTIL CANCELLED", Vec::new(), None, None, false, false);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await
    };

    let (query_result, cancel_result) = tokio::join!(query, cancel);
    cancel_result.unwrap();

    let result = query_result.unwrap().expect("a cancelled query still returns a result with an error terminal");
    assert!(!result.is_good_and_done());
    let err = result.last_exception().expect("cancellation surfaces as the terminal error");
    assert!(matches!(err, DriverError::Session { ref sql_state, .. } if sql_state == "70100"));

    let mirrored = handle.get_last_exception().await.unwrap();
    assert!(mirrored.is_some_and(|msg| msg.contains("70100")), "the Handle also surfaces the same error");

    handle.close().await.unwrap();
}
