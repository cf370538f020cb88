//! E2E: full exchange lifecycle against scripted collaborators.
//!
//! Flow under test:
//! 1. Create a BTC→XMR floating exchange through the real quote path
//! 2. Deposit appears on the one-time address -> `received`
//! 3. Confirmations accumulate to the finality threshold -> `exchanging`
//! 4. Settlement succeeds -> `completed`

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use cambio_connectors::{
    DepositCheck, StubAddressProvider, StubChainObserver, StubPriceSource, StubSettlement,
};
use cambio_domain::{CurrencyCatalog, ExchangeId, ExchangeStatus, RateType};
use cambio_engine::RateEngine;
use cambio_store::{ExchangeRepository, MemoryStore};
use cambio_testkit::sample_address;
use cambiod::{EventBus, ExchangeEvent, ExchangeManager, NewExchangeRequest};

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    observer: Arc<StubChainObserver>,
    settlement: Arc<StubSettlement>,
    store: Arc<MemoryStore>,
    bus: Arc<EventBus>,
    manager: Arc<ExchangeManager>,
}

fn fixture() -> Fixture {
    let observer = Arc::new(StubChainObserver::new());
    let settlement = Arc::new(StubSettlement::new());
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::new(256));

    let price_source = Arc::new(StubPriceSource::new());
    price_source.set_rate("BTC", "XMR", dec!(112.78421));

    let manager = Arc::new(ExchangeManager::new(
        Arc::new(CurrencyCatalog::builtin().clone()),
        store.clone(),
        observer.clone(),
        settlement.clone(),
        price_source,
        Arc::new(StubAddressProvider::new()),
        RateEngine::default(),
        bus.clone(),
        Some(Duration::from_millis(5)),
    ));

    Fixture {
        observer,
        settlement,
        store,
        bus,
        manager,
    }
}

fn btc_xmr_request() -> NewExchangeRequest {
    NewExchangeRequest {
        from_currency: "BTC".to_string(),
        to_currency: "XMR".to_string(),
        from_amount: dec!(0.1),
        receiving_address: sample_address("XMR").to_string(),
        refund_address: None,
        email: None,
        rate_type: RateType::Floating,
    }
}

async fn wait_for_status(store: &MemoryStore, id: ExchangeId, target: ExchangeStatus) {
    for _ in 0..400 {
        let record = store.load(id).await.unwrap();
        if record.status == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Exchange {} never reached {}", id, target);
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_lifecycle_btc_to_xmr() {
    let fx = fixture();
    let mut receiver = fx.bus.subscribe();

    // Create: quote at observed rate 112.78421, 1% floating commission
    let record = fx.manager.clone().create_exchange(btc_xmr_request()).await.unwrap();
    assert_eq!(record.status, ExchangeStatus::Waiting);
    assert_eq!(record.to_amount.as_decimal(), dec!(11.16563679));
    assert_eq!(record.required_confirmations, 2);

    // Exact deposit appears; three confirmation ticks report 1, 2, 2
    fx.observer.script_deposit(
        &record.deposit_address,
        DepositCheck::detected("h1", dec!(0.1), 0),
    );
    fx.observer.script_confirmations("h1", vec![1, 2, 2]);

    wait_for_status(&fx.store, record.id, ExchangeStatus::Completed).await;

    let finished = fx.store.load(record.id).await.unwrap();
    assert_eq!(finished.status, ExchangeStatus::Completed);
    assert_eq!(finished.deposit_tx_hash.as_deref(), Some("h1"));
    assert_eq!(finished.actual_received_amount, Some(dec!(0.1)));
    assert_eq!(finished.confirmations, 2);

    // Settlement ran exactly once, on the full deposit
    assert_eq!(fx.settlement.calls(), 1);
    assert_eq!(
        fx.settlement.last_converted().unwrap().settlement_amount(),
        dec!(0.1)
    );

    // Status progression: waiting -> received(0/2) -> received(1/2)
    // -> received(2/2) -> exchanging -> completed, exchanging exactly once
    let mut statuses = Vec::new();
    let mut received_counts = Vec::new();
    while let Some(Ok(event)) = receiver.try_recv() {
        if let ExchangeEvent::StatusChanged {
            exchange_id,
            status,
            confirmations,
            required_confirmations,
            ..
        } = event
        {
            if exchange_id != record.id {
                continue;
            }
            if status == ExchangeStatus::Received {
                received_counts.push((confirmations.unwrap(), required_confirmations.unwrap()));
            }
            statuses.push(status);
        }
    }

    assert_eq!(statuses.first(), Some(&ExchangeStatus::Waiting));
    assert_eq!(statuses.last(), Some(&ExchangeStatus::Completed));
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == ExchangeStatus::Exchanging)
            .count(),
        1
    );
    assert_eq!(received_counts, vec![(0, 2), (1, 2), (2, 2)]);

    // Driver task deregistered itself after the terminal transition
    for _ in 0..100 {
        if fx.manager.active_task_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fx.manager.active_task_count().await, 0);
}

#[tokio::test]
async fn test_short_deposit_settles_on_actual_amount() {
    let fx = fixture();
    let mut receiver = fx.bus.subscribe();

    let record = fx.manager.clone().create_exchange(btc_xmr_request()).await.unwrap();

    // 0.095 BTC arrives instead of the requested 0.1
    fx.observer.script_deposit(
        &record.deposit_address,
        DepositCheck::detected("h1", dec!(0.095), 0),
    );
    fx.observer.script_confirmations("h1", vec![2]);

    wait_for_status(&fx.store, record.id, ExchangeStatus::Completed).await;

    let finished = fx.store.load(record.id).await.unwrap();
    assert_eq!(finished.actual_received_amount, Some(dec!(0.095)));
    // The requested amount is preserved, never silently replaced
    assert_eq!(finished.from_amount.as_decimal(), dec!(0.1));

    // Downstream settlement math used the actual amount
    assert_eq!(
        fx.settlement.last_converted().unwrap().settlement_amount(),
        dec!(0.095)
    );

    // The mismatch notice was emitted once, informational only
    let mut mismatches = 0;
    while let Some(Ok(event)) = receiver.try_recv() {
        if let ExchangeEvent::AmountMismatch {
            exchange_id,
            expected,
            actual,
            ..
        } = event
        {
            assert_eq!(exchange_id, record.id);
            assert_eq!(expected, dec!(0.1));
            assert_eq!(actual, dec!(0.095));
            mismatches += 1;
        }
    }
    assert_eq!(mismatches, 1);
}

#[tokio::test]
async fn test_settlement_failure_is_terminal_with_reason() {
    let fx = fixture();
    fx.settlement.set_fail_with(Some("conversion venue rejected order"));

    let record = fx.manager.clone().create_exchange(btc_xmr_request()).await.unwrap();
    fx.observer.script_deposit(
        &record.deposit_address,
        DepositCheck::detected("h1", dec!(0.1), 0),
    );
    fx.observer.script_confirmations("h1", vec![2]);

    wait_for_status(&fx.store, record.id, ExchangeStatus::Failed).await;

    let finished = fx.store.load(record.id).await.unwrap();
    assert_eq!(finished.status, ExchangeStatus::Failed);
    assert_eq!(
        finished.failure_reason.as_deref(),
        Some("conversion venue rejected order")
    );
}

#[tokio::test]
async fn test_start_monitoring_completed_record_makes_no_calls() {
    let fx = fixture();

    let mut record = cambio_testkit::btc_to_xmr(dec!(0.1), dec!(112.78421));
    record.register_deposit("h1", dec!(0.1)).unwrap();
    record.record_confirmations(2, 500).unwrap();
    record.begin_exchanging().unwrap();
    record.complete().unwrap();
    fx.store.insert(&record).await.unwrap();

    fx.manager.clone().start_monitoring(record.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fx.observer.total_calls(), 0);
    assert_eq!(fx.manager.active_task_count().await, 0);
    let after = fx.store.load(record.id).await.unwrap();
    assert_eq!(after.status, ExchangeStatus::Completed);
}

#[tokio::test]
async fn test_transient_outage_does_not_fail_the_exchange() {
    let fx = fixture();

    let record = fx.manager.clone().create_exchange(btc_xmr_request()).await.unwrap();

    // First poll fails; the monitor must retry, not fail the record
    fx.observer.set_fail_next(true);
    fx.observer.script_deposit(
        &record.deposit_address,
        DepositCheck::detected("h1", dec!(0.1), 0),
    );
    fx.observer.script_confirmations("h1", vec![2]);

    wait_for_status(&fx.store, record.id, ExchangeStatus::Completed).await;
}

#[tokio::test]
async fn test_subscribe_exchange_callback_sees_every_change() {
    let fx = fixture();

    let record = fx.manager.clone().create_exchange(btc_xmr_request()).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = fx.bus.subscribe_exchange(record.id, move |update| {
        let _ = tx.send((update.status, update.confirmations));
    });

    fx.observer.script_deposit(
        &record.deposit_address,
        DepositCheck::detected("h1", dec!(0.1), 0),
    );
    fx.observer.script_confirmations("h1", vec![1, 2]);

    wait_for_status(&fx.store, record.id, ExchangeStatus::Completed).await;
    handle.await.unwrap();

    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }

    // Deposit detection, each confirmation change, finality, settlement
    assert_eq!(updates.first(), Some(&(ExchangeStatus::Received, Some(0))));
    assert_eq!(updates.last(), Some(&(ExchangeStatus::Completed, Some(2))));
    assert!(updates.contains(&(ExchangeStatus::Exchanging, Some(2))));
}
