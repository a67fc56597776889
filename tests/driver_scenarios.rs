//! End-to-end scenarios driven against the fake storage node in
//! `support/`, over a real loopback TCP socket.

mod support;

use xrpc::pool::PoolConfig;

#[tokio::test]
async fn simple_query_returns_one_row_and_closes_cleanly() {
    let addr = support::spawn_fake_server().await;
    let pool = support::pool_with(PoolConfig::default());
    let target = support::target(addr);

    let handle = pool.acquire(target.clone()).await.unwrap();
    handle.init(0).await.unwrap();

    let mut result = handle
        .exec_query("SELECT 1", Vec::new(), None, None, false, false)
        .await
        .unwrap()
        .expect("a query produces a result");

    let row = result.next_row().await.unwrap().expect("one row");
    assert_eq!(row, vec![b"1".to_vec()]);
    assert_eq!(result.next_row().await.unwrap(), None);
    assert!(result.is_good_and_done());
    assert!(result.warnings().is_empty());

    handle.close().await.unwrap();
}

#[tokio::test]
async fn explicit_transaction_commits_without_rollback_on_close() {
    let addr = support::spawn_fake_server().await;
    let pool = support::pool_with(PoolConfig::default());
    let target = support::target(addr);

    let handle = pool.acquire(target.clone()).await.unwrap();
    handle.init(0).await.unwrap();

    handle.set_auto_commit(false).await.unwrap();

    let insert = handle
        .exec_update("INSERT INTO t VALUES(1)", Vec::new(), None, None, false)
        .await
        .unwrap()
        .expect("an update produces a terminal result");
    assert_eq!(insert.affected_rows(), 1);

    handle
        .exec_update("COMMIT", Vec::new(), None, None, true)
        .await
        .unwrap();

    // autocommit is still false: only the transaction state, not the
    // client-tracked autocommit flag, reset on COMMIT.
    handle.close().await.unwrap();
}

#[tokio::test]
async fn lazy_cts_snapshot_seq_rides_the_single_exec_message() {
    let (addr, recorder) = support::spawn_fake_server_with_recorder().await;
    let pool = support::pool_with(PoolConfig::default());
    let target = support::target(addr);

    let handle = pool.acquire(target.clone()).await.unwrap();
    handle.init(0).await.unwrap();

    handle.set_auto_commit(false).await.unwrap();
    handle.set_lazy_cts_transaction().await.unwrap();
    handle.set_lazy_snapshot_seq(100).await.unwrap();

    handle
        .exec_query("SELECT 1", Vec::new(), None, None, false, false)
        .await
        .unwrap()
        .expect("a query still produces a result");

    let sent = recorder.lock().await;
    assert_eq!(sent.len(), 1, "no separate begin RPC, only the one exec carrying the envelope");
    let lazy_txn = sent[0].lazy_txn.as_ref().expect("snapshot metadata piggy-backed on the exec");
    assert!(lazy_txn.lazy_cts);
    assert_eq!(lazy_txn.snapshot_seq, Some(100));

    drop(sent);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn streaming_respects_token_window_until_offered_more() {
    let addr = support::spawn_fake_server().await;
    let pool = support::pool_with(PoolConfig::default());
    let target = support::target(addr);

    let handle = pool.acquire(target.clone()).await.unwrap();
    handle.init(0).await.unwrap();
    handle.set_stream_mode(true);
    handle.set_default_token_count(2);

    let mut result = handle
        .exec_query("SELECT * FROM big", Vec::new(), None, None, false, false)
        .await
        .unwrap()
        .expect("a streaming query produces a result");

    assert_eq!(result.next_row().await.unwrap(), Some(vec![b"1".to_vec()]));
    assert_eq!(result.next_row().await.unwrap(), Some(vec![b"2".to_vec()]));

    result.token_offer(2).await.unwrap();
    assert_eq!(result.next_row().await.unwrap(), Some(vec![b"3".to_vec()]));
    assert_eq!(result.next_row().await.unwrap(), Some(vec![b"4".to_vec()]));

    result.token_offer(1).await.unwrap();
    assert_eq!(result.next_row().await.unwrap(), Some(vec![b"5".to_vec()]));
    assert_eq!(result.next_row().await.unwrap(), None);
    assert!(result.is_good_and_done());

    handle.close().await.unwrap();
}
