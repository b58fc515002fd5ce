//! Integration test: safety properties of the swap core that must hold
//! regardless of how steps are triggered.

use std::sync::{Arc, Barrier};

use chrono::Duration;
use hlv_core::{PaymentHash, Preimage, SwapPolicy, SwapStatus, SwapStep, WatchEvent};
use hlv_engine::{ErrorClass, StepOutcome};
use hlv_integration_tests::SwapFixture;
use hlv_ledger::{ISwapLedger, LedgerError, SwapFilter};
use hlv_scheduler::{JobKey, SchedulerError};

async fn locked_and_confirmed(fx: &SwapFixture) -> hlv_core::Swap {
    let invoice = fx.counterparty_invoice(10_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 10_000))
        .await
        .unwrap();
    fx.engine.run_step(receipt.swap_id, SwapStep::LockHtlc).await.unwrap();
    let depth = fx.confirmation_depth();
    fx.contract.mine_blocks(depth as u64);
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::HtlcConfirmed { confirmations: depth })
        .await
        .unwrap();
    fx.swap(receipt.swap_id).await
}

// =========================================================================
// Preimage binding
// =========================================================================

#[test]
fn test_preimage_matches_only_its_own_hash() {
    for _ in 0..256 {
        let bytes: [u8; 32] = rand::random();
        let preimage = Preimage::new(bytes);
        let hash = preimage.payment_hash();
        assert!(preimage.matches(&hash));

        let other = PaymentHash(rand::random());
        if other != hash {
            assert!(!preimage.matches(&other));
        }
    }
}

#[tokio::test]
async fn test_ledger_rejects_foreign_preimage() {
    let fx = SwapFixture::default();
    let swap = locked_and_confirmed(&fx).await;

    for _ in 0..32 {
        let foreign = Preimage::new(rand::random());
        let mut next = swap.clone();
        next.status = SwapStatus::PaymentSettled;
        next.preimage = Some(foreign);

        let err = fx.ledger.compare_and_set(&swap, next).await.unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)), "unexpected: {}", err);
    }
    let stored = fx.swap(swap.swap_id).await;
    assert_eq!(stored, swap);
    assert!(stored.preimage.is_none());
}

// =========================================================================
// Transition table
// =========================================================================

#[tokio::test]
async fn test_invalid_transition_leaves_state_unchanged() {
    let fx = SwapFixture::default();
    let receipt = fx.service.create_swap(fx.address_request(10_000)).await.unwrap();
    let swap = fx.swap(receipt.swap_id).await;

    for target in [SwapStatus::PaymentSettled, SwapStatus::PreimageSubmitted, SwapStatus::Completed] {
        let mut next = swap.clone();
        next.status = target;
        let err = fx.ledger.compare_and_set(&swap, next).await.unwrap_err();
        assert!(
            matches!(err, LedgerError::InvalidTransition { from: SwapStatus::Pending, .. }),
            "unexpected: {}",
            err
        );
    }

    let stored = fx.swap(receipt.swap_id).await;
    assert_eq!(stored, swap);
    assert_eq!(fx.ledger.transitions(receipt.swap_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_writer_loses_compare_and_set() {
    let fx = SwapFixture::default();
    let receipt = fx.service.create_swap(fx.address_request(10_000)).await.unwrap();
    let stale = fx.swap(receipt.swap_id).await;

    fx.service.cancel_swap(receipt.swap_id).await.unwrap();

    let next = stale.amend(fx.now(), |s| s.last_error = Some("late".into())).unwrap();
    let err = fx.ledger.compare_and_set(&stale, next).await.unwrap_err();
    assert!(matches!(err, LedgerError::Conflict { .. }));
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::Cancelled);
}

// =========================================================================
// Idempotency and single flight
// =========================================================================

#[tokio::test]
async fn test_pay_invoice_executes_at_most_once() {
    let fx = SwapFixture::default();
    let swap = locked_and_confirmed(&fx).await;

    let first = fx.engine.run_step(swap.swap_id, SwapStep::PayInvoice).await.unwrap();
    let settled = fx.swap(swap.swap_id).await;
    let second = fx.engine.run_step(swap.swap_id, SwapStep::PayInvoice).await.unwrap();

    assert_eq!(first, StepOutcome::Done);
    assert_eq!(second, StepOutcome::Done);
    assert_eq!(fx.payment.pay_calls(), 1);

    let after = fx.swap(swap.swap_id).await;
    assert_eq!(after.preimage, settled.preimage);
    assert_eq!(after.payment_tx_id, settled.payment_tx_id);
}

#[tokio::test]
async fn test_concurrent_claims_single_flight() {
    let fx = SwapFixture::default();
    let receipt = fx.service.create_swap(fx.address_request(10_000)).await.unwrap();
    let key = JobKey::step(receipt.swap_id, SwapStep::CreateInvoice);

    let barrier = Arc::new(Barrier::new(2));
    let results: Vec<Result<_, SchedulerError>> = std::thread::scope(|s| {
        let handles: Vec<_> = ["worker-a", "worker-b"]
            .into_iter()
            .map(|owner| {
                let barrier = barrier.clone();
                let scheduler = &fx.scheduler;
                let key = &key;
                s.spawn(move || {
                    barrier.wait();
                    scheduler.claim(key, owner)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(SchedulerError::NotAvailable(k)) if *k == key)));
}

// =========================================================================
// Timelock safety
// =========================================================================

#[tokio::test]
async fn test_lock_inside_safety_margin_never_reaches_chain() {
    let fx = SwapFixture::new(SwapPolicy {
        safety_margin_secs: 3_600,
        ..SwapPolicy::default()
    });
    let invoice = fx.counterparty_invoice(10_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 10_000))
        .await
        .unwrap();

    let margin = fx.engine.context().policy.safety_margin();
    let swap = fx.swap(receipt.swap_id).await;
    fx.clock.set(swap.timelock - margin + Duration::seconds(1));

    let outcome = fx.engine.run_step(receipt.swap_id, SwapStep::LockHtlc).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Retry(_)));
    assert_eq!(fx.contract.lock_calls(), 0);
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::Pending);
}

#[tokio::test]
async fn test_short_timelock_rejected_on_create() {
    let fx = SwapFixture::default();
    let mut request = fx.address_request(10_000);
    request.timelock = Some(fx.now() + Duration::minutes(5));

    let err = fx.service.create_swap(request).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert!(fx.service.list_swaps(SwapFilter::default()).await.unwrap().is_empty());
    assert_eq!(fx.contract.lock_calls(), 0);
    assert_eq!(fx.payment.create_calls(), 0);
}
