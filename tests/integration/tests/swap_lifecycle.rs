//! Integration test: swaps driven end to end across the service, engine,
//! scheduler, worker and internal providers.

use std::time::Duration as StdDuration;

use chrono::Duration;
use hlv_core::{StepState, SwapPolicy, SwapStatus, SwapStep, WatchEvent};
use hlv_engine::{ChainWatcher, StepOutcome, WatcherConfig};
use hlv_integration_tests::SwapFixture;
use hlv_ledger::ISwapLedger;
use hlv_providers::ProviderError;
use hlv_scheduler::JobState;

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn test_payment_to_chain_swap_completes() {
    let fx = SwapFixture::default();
    let depth = fx.confirmation_depth();

    let receipt = fx.service.create_swap(fx.address_request(10_000)).await.unwrap();
    assert_eq!(receipt.status, SwapStatus::Pending);

    // create-invoice, then lock
    fx.run_jobs().await;
    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::HtlcLocked);
    assert!(swap.payment_invoice.is_some());
    assert_eq!(swap.htlc_recipient, "0xcounterparty");

    fx.contract.mine_blocks(depth as u64);
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::HtlcConfirmed { confirmations: depth })
        .await
        .unwrap();

    // pay-invoice, then submit-preimage
    fx.run_jobs().await;
    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::PreimageSubmitted);
    assert!(swap.preimage.as_ref().unwrap().matches(&swap.payment_hash.unwrap()));
    assert!(swap.claim_tx_hash.is_some());

    fx.contract.mine_blocks(depth as u64);
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::ClaimConfirmed { confirmations: depth })
        .await
        .unwrap();

    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::Completed);
    assert!(swap.completed_at.is_some());
    assert_eq!(fx.payment.pay_calls(), 1);
    assert_eq!(fx.contract.claim_calls(), 1);

    let history: Vec<SwapStatus> = fx
        .ledger
        .transitions(receipt.swap_id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(history.first(), Some(&SwapStatus::Pending));
    assert_eq!(history.last(), Some(&SwapStatus::Completed));
}

#[tokio::test]
async fn test_watcher_drives_invoice_swap_to_completion() {
    let fx = SwapFixture::default();
    let watcher = ChainWatcher::new(fx.engine.context().clone(), WatcherConfig::default());
    let depth = fx.confirmation_depth() as u64;

    let invoice = fx.counterparty_invoice(25_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 25_000))
        .await
        .unwrap();

    let mut status = SwapStatus::Pending;
    for _ in 0..10 {
        fx.contract.mine_blocks(depth);
        watcher.poll_once().await.unwrap();
        fx.run_jobs().await;
        status = fx.swap(receipt.swap_id).await.status;
        if status == SwapStatus::Completed {
            break;
        }
    }
    assert_eq!(status, SwapStatus::Completed);
    assert_eq!(fx.payment.pay_calls(), 1);
    assert_eq!(fx.contract.lock_calls(), 1);
}

// =========================================================================
// Expiry and refund
// =========================================================================

#[tokio::test]
async fn test_timelock_elapsed_refunds_locked_swap() {
    let fx = SwapFixture::default();
    let invoice = fx.counterparty_invoice(10_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 10_000))
        .await
        .unwrap();
    fx.run_jobs().await;
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::HtlcLocked);

    fx.clock.advance(Duration::hours(25));
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::TimelockElapsed)
        .await
        .unwrap();
    fx.run_jobs().await;

    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::Refunded);
    assert!(swap.refund_tx_hash.is_some());
    assert_eq!(fx.contract.refund_calls(), 1);

    // The swap is no longer locked; paying now is a no-op.
    let outcome = fx.engine.run_step(receipt.swap_id, SwapStep::PayInvoice).await.unwrap();
    assert_eq!(outcome, StepOutcome::Done);
    assert_eq!(fx.payment.pay_calls(), 0);
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::Refunded);
}

#[tokio::test]
async fn test_timelock_sweep_cancels_unlocked_swap() {
    let fx = SwapFixture::default();
    let watcher = ChainWatcher::new(fx.engine.context().clone(), WatcherConfig::default());
    fx.payment.set_offline(true);
    let receipt = fx.service.create_swap(fx.address_request(10_000)).await.unwrap();

    fx.clock.advance(Duration::hours(25));
    assert_eq!(watcher.sweep_timelocks().await.unwrap(), 1);
    fx.run_jobs().await;

    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::Cancelled);
    assert_eq!(fx.contract.lock_calls(), 0);
}

// =========================================================================
// Ambiguous execution
// =========================================================================

#[tokio::test]
async fn test_pay_timeout_reconciles_to_settled() {
    let fx = SwapFixture::new(SwapPolicy {
        step_timeout_ms: 50,
        ..SwapPolicy::default()
    });
    let depth = fx.confirmation_depth();
    let invoice = fx.counterparty_invoice(10_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 10_000))
        .await
        .unwrap();
    fx.run_jobs().await;
    fx.contract.mine_blocks(depth as u64);
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::HtlcConfirmed { confirmations: depth })
        .await
        .unwrap();

    // execute outlives the step timeout after precheck passed
    fx.payment.set_pay_delay(Some(StdDuration::from_millis(500)));
    fx.run_jobs().await;
    let record = fx
        .ledger
        .step_record(receipt.swap_id, SwapStep::PayInvoice)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(record.state, StepState::Partial { .. }));
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::HtlcLocked);

    // the lease lapses and the next claim reconciles instead of paying again
    fx.payment.set_pay_delay(None);
    fx.clock
        .advance(Duration::seconds(fx.scheduler.config().lease_duration_secs + 1));
    fx.run_jobs().await;

    let swap = fx.swap(receipt.swap_id).await;
    assert!(matches!(
        swap.status,
        SwapStatus::PaymentSettled | SwapStatus::PreimageSubmitted
    ));
    assert!(swap.preimage.is_some());
    assert_eq!(fx.payment.pay_calls(), 1);
}

#[tokio::test]
async fn test_payment_landing_on_last_attempt_is_not_failed() {
    let fx = SwapFixture::new(SwapPolicy {
        step_timeout_ms: 50,
        ..SwapPolicy::default()
    });
    let depth = fx.confirmation_depth();
    let max_attempts = fx.scheduler.config().max_attempts;
    let invoice = fx.counterparty_invoice(10_000).await;
    let receipt = fx
        .service
        .create_swap(fx.invoice_request(invoice, 10_000))
        .await
        .unwrap();
    fx.run_jobs().await;
    fx.contract.mine_blocks(depth as u64);
    fx.engine
        .handle_event(receipt.swap_id, WatchEvent::HtlcConfirmed { confirmations: depth })
        .await
        .unwrap();

    // every attempt but the last fails before reaching the network
    for _ in 1..max_attempts {
        fx.payment
            .inject_failure(ProviderError::Transient("rpc down".into()));
    }
    for _ in 1..max_attempts {
        fx.run_jobs().await;
        fx.clock.advance(Duration::minutes(10));
    }
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::HtlcLocked);

    // the last attempt pays but its response is lost
    fx.payment.set_pay_delay(Some(StdDuration::from_millis(500)));
    fx.run_jobs().await;
    assert_eq!(fx.payment.pay_calls(), max_attempts);
    assert_eq!(fx.swap(receipt.swap_id).await.status, SwapStatus::HtlcLocked);

    // the lapsed lease is dead-lettered on the next claim
    fx.payment.set_pay_delay(None);
    fx.clock.advance(Duration::minutes(10));
    fx.run_jobs().await;

    let dead = fx.scheduler.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(matches!(
        &dead[0].state,
        JobState::Dead { reason } if reason.contains("timed out")
    ));

    let swap = fx.swap(receipt.swap_id).await;
    assert_eq!(swap.status, SwapStatus::PreimageSubmitted);
    assert!(swap.preimage.as_ref().unwrap().matches(&swap.payment_hash.unwrap()));
    assert!(swap.last_error.is_none());
    assert_eq!(fx.payment.pay_calls(), max_attempts);
    assert_eq!(fx.contract.claim_calls(), 1);
}
