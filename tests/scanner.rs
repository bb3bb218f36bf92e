mod common;

use std::collections::HashMap;
use std::time::Duration;

use futures::stream;
use recovery_scanner::bitcoin::Amount;
use recovery_scanner::{CancellationToken, Error, Report, WalletAddress};

use common::*;

fn final_report(reports: &[Report<WalletAddress>]) -> &Report<WalletAddress> {
    reports.last().expect("at least one report")
}

#[tokio::test]
async fn test_finds_single_utxo() {
    init_logger();

    let addresses = test_addresses(250);
    let mut config = MockConfig::default();
    config.fund(&addresses[137], 0, 5_000);
    let server = MockServer::start(config).await;

    let scanner = test_scanner(&server, 2, 100, 10);
    let reports = drain(scanner.scan(stream::iter(addresses.clone()))).await;

    assert_eq!(reports.len(), 3);
    assert_monotonic(&reports);

    let report = final_report(&reports);
    assert!(report.error.is_none());
    assert_eq!(report.scanned_addresses, 250);
    assert_eq!(report.utxos_found.len(), 1);
    assert_eq!(report.utxos_found[0].amount, Amount::from_sat(5_000));
    assert_eq!(report.utxos_found[0].address, addresses[137]);
    assert_eq!(report.utxos_found[0].txid.to_string(), TEST_TXID);

    // 100 + 100 + 50
    assert_eq!(Stats::get(&server.stats.batch_calls), 3);
    assert_eq!(Stats::get(&server.stats.lookups), 250);
    assert!(Stats::get(&server.stats.tls_attempts) > 0);
}

#[tokio::test]
async fn test_permuted_batches_are_reassembled() {
    init_logger();

    let addresses = test_addresses(120);
    let funded = [(3, 1_000), (57, 2_000), (58, 3_000), (119, 4_000)];

    let mut config = MockConfig {
        permute_batches: true,
        ..Default::default()
    };
    for (index, value) in funded.iter() {
        config.fund(&addresses[*index], 1, *value);
    }
    let server = MockServer::start(config).await;

    let scanner = test_scanner(&server, 3, 40, 10);
    let reports = drain(scanner.scan(stream::iter(addresses.clone()))).await;
    let report = final_report(&reports);
    assert!(report.error.is_none());
    assert_eq!(report.scanned_addresses, 120);

    let found = report
        .utxos_found
        .iter()
        .map(|utxo| (utxo.address.clone(), utxo.amount.to_sat()))
        .collect::<HashMap<_, _>>();
    assert_eq!(found.len(), funded.len());
    for (index, value) in funded.iter() {
        assert_eq!(found.get(&addresses[*index]), Some(value));
    }
    for utxo in &report.utxos_found {
        assert_eq!(
            utxo.script,
            recovery_scanner::ScanAddress::script_pubkey(
                &utxo.address,
                recovery_scanner::bitcoin::Network::Testnet
            )
            .unwrap()
        );
    }
}

#[tokio::test]
async fn test_sequential_lookups_without_batching() {
    init_logger();

    let addresses = test_addresses(60);
    let funded = [(0, 700), (31, 800), (59, 900)];
    let fund = |config: &mut MockConfig| {
        for (index, value) in funded.iter() {
            config.fund(&addresses[*index], 0, *value);
        }
    };

    let mut batching = MockConfig::default();
    fund(&mut batching);
    let batching = MockServer::start(batching).await;

    let mut sequential = MockConfig {
        server_impl: "Fulcrum 1.9.0".to_string(),
        ..Default::default()
    };
    fund(&mut sequential);
    let sequential = MockServer::start(sequential).await;

    let batched_reports =
        drain(test_scanner(&batching, 1, 20, 10).scan(stream::iter(addresses.clone()))).await;
    let sequential_reports =
        drain(test_scanner(&sequential, 1, 20, 10).scan(stream::iter(addresses.clone()))).await;

    assert_eq!(Stats::get(&batching.stats.batch_calls), 3);
    assert_eq!(Stats::get(&batching.stats.single_lookups), 0);
    assert_eq!(Stats::get(&sequential.stats.batch_calls), 0);
    assert_eq!(Stats::get(&sequential.stats.single_lookups), 60);

    let summary = |report: &Report<WalletAddress>| {
        let mut found = report
            .utxos_found
            .iter()
            .map(|utxo| (utxo.address.address.clone(), utxo.amount))
            .collect::<Vec<_>>();
        found.sort();
        (report.scanned_addresses, found, report.is_error())
    };
    assert_eq!(
        summary(final_report(&batched_reports)),
        summary(final_report(&sequential_reports))
    );
}

#[tokio::test]
async fn test_retries_after_failed_connections() {
    init_logger();

    let addresses = test_addresses(30);
    let mut config = MockConfig {
        fail_first_connections: 3,
        ..Default::default()
    };
    config.fund(&addresses[10], 0, 10_000);
    let server = MockServer::start(config).await;

    let scanner = test_scanner(&server, 1, 30, 10);
    let reports = drain(scanner.scan(stream::iter(addresses))).await;

    assert_eq!(reports.len(), 1);
    let report = final_report(&reports);
    assert!(report.error.is_none());
    assert_eq!(report.scanned_addresses, 30);
    assert_eq!(report.total_amount(), Amount::from_sat(10_000));
    assert_eq!(Stats::get(&server.stats.connections), 4);
}

#[tokio::test]
async fn test_persistent_failure_ends_scan_once() {
    init_logger();

    let server = MockServer::start(MockConfig {
        fail_calls: true,
        ..Default::default()
    })
    .await;

    let scanner = test_scanner(&server, 2, 10, 1);
    let reports = drain(scanner.scan(stream::iter(test_addresses(50)))).await;

    assert_eq!(reports.len(), 1);
    let report = final_report(&reports);
    match report.error.as_deref() {
        Some(Error::TaskTimedOut {
            last_error: Some(last_error),
            ..
        }) => assert!(matches!(**last_error, Error::Protocol(_))),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(report
        .error
        .as_ref()
        .map(|e| e.to_string().contains("last error"))
        .unwrap_or(false));
    assert_eq!(report.scanned_addresses, 0);
}

#[tokio::test]
async fn test_hanging_server_times_out() {
    init_logger();

    let server = MockServer::start(MockConfig {
        hang: true,
        ..Default::default()
    })
    .await;

    let scanner = test_scanner(&server, 1, 10, 1);
    let reports = tokio::time::timeout(
        Duration::from_secs(10),
        drain(scanner.scan(stream::iter(test_addresses(10)))),
    )
    .await
    .expect("the scan must not hang");

    assert_eq!(reports.len(), 1);
    assert!(matches!(
        final_report(&reports).error.as_deref(),
        Some(Error::TaskTimedOut { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_connections() {
    init_logger();

    let server = MockServer::start(MockConfig {
        call_delay: Duration::from_millis(20),
        ..Default::default()
    })
    .await;

    let scanner = test_scanner(&server, 3, 10, 10);
    let reports = drain(scanner.scan(stream::iter(test_addresses(200)))).await;

    assert_eq!(reports.len(), 20);
    assert_eq!(final_report(&reports).scanned_addresses, 200);
    assert!(Stats::get(&server.stats.max_active_connections) <= 3);
    assert!(Stats::get(&server.stats.max_in_flight) <= 3);
    // clients stay connected between batches
    assert_eq!(Stats::get(&server.stats.connections), 3);
}

#[tokio::test]
async fn test_idle_reader_stalls_scan() {
    init_logger();

    let server = MockServer::start(MockConfig::default()).await;
    let scanner = test_scanner(&server, 1, 10, 10);

    let reports = scanner.scan(stream::iter(test_addresses(80)));
    tokio::time::sleep(Duration::from_millis(500)).await;

    // a handful of batches fit in the channels, not all 8
    let served = Stats::get(&server.stats.batch_calls);
    assert!(served > 0);
    assert!(served < 8, "{} batches served without a reader", served);

    let reports = drain(reports).await;
    assert_eq!(reports.len(), 8);
    assert_eq!(final_report(&reports).scanned_addresses, 80);
}

#[tokio::test]
async fn test_cancel_ends_with_cancelled_report() {
    init_logger();

    let server = MockServer::start(MockConfig {
        call_delay: Duration::from_secs(30),
        ..Default::default()
    })
    .await;
    let scanner = test_scanner(&server, 2, 10, 60);

    let cancel = CancellationToken::new();
    let reports = scanner.scan_with_cancel(stream::iter(test_addresses(100)), cancel.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let reports = tokio::time::timeout(Duration::from_secs(5), drain(reports))
        .await
        .expect("cancellation must end the scan");
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        final_report(&reports).error.as_deref(),
        Some(Error::Cancelled)
    ));
}

#[tokio::test]
async fn test_dropping_receiver_stops_scan() {
    init_logger();

    let server = MockServer::start(MockConfig {
        call_delay: Duration::from_millis(20),
        ..Default::default()
    })
    .await;
    let scanner = test_scanner(&server, 1, 10, 10);

    let mut reports = scanner.scan(stream::iter(test_addresses(1_000)));
    assert!(reports.recv().await.is_some());
    drop(reports);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let served = Stats::get(&server.stats.batch_calls);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(Stats::get(&server.stats.batch_calls), served);
    assert!(served < 100);
}
