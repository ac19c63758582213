//! End-to-end transfer scenarios over the in-memory harness

use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bridge_operator::error::{BridgeError, ValidationError};
use bridge_operator::hash::transfer_digest;
use bridge_operator::overrides::OverrideAction;
use bridge_operator::recovery::RecoveryOutcome;
use bridge_operator::store::TransactionJournal;
use bridge_operator::testing::{
    local_validator_set, sample_transaction, FailMode, Harness, MemoryJournal,
};
use bridge_operator::transaction::{split_fee, ValidatorSignature};
use bridge_operator::validators::SignatureCollector;
use bridge_operator::{Direction, Status};

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Initiate a transfer whose mint keeps failing, then let the detector mark it stuck
async fn stuck_eth_to_sol(h: &Harness) -> String {
    h.sol.fail_always("mint", FailMode::Transient);
    let err = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err();
    let tx_id = match err {
        BridgeError::TransferFailed { tx_id, .. } => tx_id,
        other => panic!("unexpected error: {other}"),
    };
    h.detector
        .scan(Utc::now() + ChronoDuration::minutes(61))
        .await;
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::Stuck);
    tx_id
}

#[tokio::test]
async fn eth_to_sol_transfer_mints_net_amount() {
    let h = Harness::ready().await;
    let tx_id = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap();

    let snapshot = h.service.check_transaction(&tx_id).await.unwrap();
    let tx = snapshot.transaction;
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(tx.fee, dec("0.01"));
    assert_eq!(tx.net_amount, dec("9.99"));
    assert!(tx.signatures.len() >= 3);
    assert!(tx.completed_at.is_some());
    assert!(!snapshot.is_stuck);
    assert_eq!(h.eth.calls("lock"), 1);
    assert_eq!(h.sol.calls("mint"), 1);
    assert_eq!(h.store.counts().await, (0, 1));
}

#[tokio::test]
async fn sol_to_eth_transfer_burns_then_releases() {
    let h = Harness::ready().await;
    let tx_id = h
        .service
        .initiate_bridge(Direction::SolToEth, dec("5"), "SolSender", "0xrecipient")
        .await
        .unwrap();

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Released);
    assert_eq!(h.sol.calls("burn"), 1);
    assert_eq!(h.eth.calls("release"), 1);
    assert_eq!(h.eth.calls("lock"), 0);
}

#[tokio::test]
async fn amount_bounds_are_enforced_before_anything_happens() {
    let h = Harness::ready().await;
    for amount in ["0.001", "100.01"] {
        let err = h
            .service
            .initiate_bridge(Direction::EthToSol, dec(amount), "0xsender", "SolRecipient")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)), "{amount}: {err}");
    }
    assert_eq!(h.store.counts().await, (0, 0));
    // Bounds are inclusive
    h.service
        .initiate_bridge(Direction::EthToSol, dec("100"), "0xsender", "SolRecipient")
        .await
        .unwrap();
    assert_eq!(h.eth.calls("lock"), 1);
}

#[tokio::test]
async fn stuck_transfer_escalates_after_max_retries() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;

    for _ in 0..3 {
        h.recovery.run_cycle().await;
    }
    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::AdminReview);
    assert_eq!(tx.retry_count, 3);
    assert_eq!(tx.recovery_attempts.len(), 3);
    assert!(tx.recovery_attempts.iter().all(|a| !a.success));
    // The source step landed once and was never repeated
    assert_eq!(h.eth.calls("lock"), 1);
    assert_eq!(h.sink.count_containing("needs admin review"), 1);

    // Nothing further happens without an operator
    let report = h.recovery.run_cycle().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(h.store.get(&tx_id).await.unwrap().retry_count, 3);

    let dashboard = h.service.get_recovery_dashboard().await;
    assert_eq!(dashboard.total_stuck, 1);
    assert_eq!(dashboard.requiring_admin_review, 1);
    assert_eq!(dashboard.total_stuck_value, dec("10"));
    assert_eq!(dashboard.stuck_by_direction["eth_to_sol"], 1);

    let report = h.service.health_report().await;
    assert!(report
        .recommendations
        .contains(&"ADMIN: 1 transactions require manual review".to_string()));
}

#[tokio::test]
async fn recovery_completes_without_repeating_finished_steps() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    let signatures_before = h.store.get(&tx_id).await.unwrap().signatures;
    h.sol.clear_failures();

    let report = h.recovery.run_cycle().await;
    assert_eq!(report.recovered, vec![tx_id.clone()]);

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(tx.retry_count, 1);
    assert!(tx.recovery_attempts.last().unwrap().success);
    assert_eq!(tx.signatures, signatures_before);
    assert_eq!(h.eth.calls("lock"), 1);
    assert!(tx.error.is_none());

    // Archived: later cycles do not see it
    let again = h.recovery.run_cycle().await;
    assert_eq!(again.attempted, 0);
}

#[tokio::test]
async fn stuck_is_never_a_resting_state_for_the_engine() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;

    let outcome = h.service.force_recovery(&tx_id).await.unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Retrying { attempt: 1, .. }));
    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Stuck);
    assert!(!tx.is_terminal());
    assert!(h.store.is_pending(&tx_id).await);
}

#[tokio::test]
async fn permanent_source_rejection_fails_without_recovery() {
    let h = Harness::ready().await;
    h.eth.fail_always("lock", FailMode::Permanent);
    let err = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err();
    let BridgeError::TransferFailed { tx_id, source } = err else {
        panic!("expected a transfer failure");
    };
    assert!(!source.is_retryable());

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Failed);
    assert!(tx.source_tx_hash.is_none());
    assert_eq!(h.sol.calls("mint"), 0);
}

#[tokio::test]
async fn critical_liquidity_rebalances_and_alerts_once() {
    let h = Harness::ready().await;
    h.eth.set_balance(dec("10"));
    h.liquidity.update_liquidity().await.unwrap();
    assert_eq!(h.liquidity.check_ratio().await, Some(dec("0.1")));

    let status = h.health.check().await;
    assert_eq!(h.liquidity.check_ratio().await, Some(dec("1")));
    assert!(status.liquidity_balanced);
    assert_eq!(h.sink.count_containing("Liquidity ratio below critical level"), 1);

    h.health.check().await;
    assert_eq!(h.sink.count_containing("Liquidity ratio below critical level"), 1);

    let snapshot = h.liquidity.snapshot().await;
    assert_eq!(snapshot.ethereum_reserve, dec("55"));
    assert_eq!(snapshot.solana_reserve, dec("55"));
    assert!(snapshot.last_rebalance.is_some());
    assert!(snapshot.awaiting_confirmation);

    let report = h.service.health_report().await;
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.starts_with("NOTE: Reserves were rebalanced in bookkeeping only")));
}

#[tokio::test]
async fn pause_blocks_transfers_and_resume_needs_both_chains() {
    let h = Harness::ready().await;
    h.service.pause();
    let err = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation(ValidationError::Paused)));

    h.sol.set_connected(false);
    let blocked = h.service.resume().await.unwrap_err();
    assert!(matches!(
        blocked,
        BridgeError::ResumeBlocked {
            ethereum_connected: true,
            solana_connected: false
        }
    ));
    assert!(h.health.is_paused());

    h.sol.set_connected(true);
    let status = h.service.resume().await.unwrap();
    assert!(status.is_healthy);
    h.service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap();
}

#[tokio::test]
async fn backlog_at_capacity_rejects_new_transfers() {
    let mut settings = Harness::settings();
    settings.bridge.max_pending_transactions = 1;
    let h = Harness::with_settings(settings).await;
    h.sol.fail_always("mint", FailMode::Transient);
    assert!(h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .is_err());

    let err = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Validation(ValidationError::Backpressure { pending: 1, limit: 1 })
    ));
    assert_eq!(h.eth.calls("lock"), 1);
}

#[tokio::test]
async fn cancel_refunds_escrow() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;

    let tx = h
        .service
        .override_transaction(&tx_id, OverrideAction::Cancel, "user requested refund", None)
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Cancelled);
    assert!(tx.admin_override);
    assert!(tx.refund_tx_hash.is_some());
    assert_eq!(
        tx.admin_notes.as_deref(),
        Some("cancel: user requested refund")
    );
    // Escrow went back to the sender on the source chain
    assert_eq!(h.eth.calls("release"), 1);
    assert!(!h.store.is_pending(&tx_id).await);
}

#[tokio::test]
async fn cancel_locked_transfer_refunds_sender() {
    let h = Harness::ready().await;
    h.sol.fail_always("mint", FailMode::Transient);
    let BridgeError::TransferFailed { tx_id, .. } = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err()
    else {
        panic!("expected a transfer failure");
    };
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::Locked);

    let tx = h
        .service
        .override_transaction(&tx_id, OverrideAction::Cancel, "user requested", None)
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Cancelled);
    assert!(tx.refund_tx_hash.is_some());
    assert_eq!(h.eth.calls("release"), 1);
    assert_eq!(h.store.counts().await, (0, 1));
    assert!(h.journal.events(&tx_id).contains(&"refunded".to_string()));
}

#[tokio::test]
async fn force_complete_needs_grant_and_notes() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    let notes = OverrideAction::ForceComplete {
        notes: "mint visible on explorer".to_string(),
    };

    let err = h
        .service
        .override_transaction(&tx_id, notes.clone(), "manual check", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Unauthorized(_)));
    assert!(h.service.elevate("wrong-token").is_err());

    let grant = h.service.elevate("harness-admin-token").unwrap();
    let err = h
        .service
        .override_transaction(
            &tx_id,
            OverrideAction::ForceComplete {
                notes: "  ".to_string(),
            },
            "manual check",
            Some(&grant),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Validation(ValidationError::MissingAdminNotes)
    ));

    let tx = h
        .service
        .override_transaction(&tx_id, notes, "manual check", Some(&grant))
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert!(tx.admin_override);
    assert!(tx.admin_notes.unwrap().contains("mint visible on explorer"));
}

#[tokio::test]
async fn retry_override_resets_budget_after_escalation() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    for _ in 0..3 {
        h.recovery.run_cycle().await;
    }
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::AdminReview);

    let tx = h
        .service
        .override_transaction(&tx_id, OverrideAction::Retry, "adapter fixed", None)
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Stuck);
    assert_eq!(tx.retry_count, 0);

    h.sol.clear_failures();
    let report = h.recovery.run_cycle().await;
    assert_eq!(report.recovered, vec![tx_id.clone()]);
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::Minted);
}

#[tokio::test]
async fn second_escalation_after_retry_override_pages_again() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    for _ in 0..3 {
        h.recovery.run_cycle().await;
    }
    assert_eq!(h.sink.count_containing("needs admin review"), 1);

    h.service
        .override_transaction(&tx_id, OverrideAction::Retry, "adapter restarted", None)
        .await
        .unwrap();
    // Still broken: the fresh budget runs out again
    for _ in 0..3 {
        h.recovery.run_cycle().await;
    }
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::AdminReview);
    assert_eq!(h.sink.count_containing("needs admin review"), 2);
}

#[tokio::test]
async fn restart_during_last_recovery_attempt_escalates() {
    let journal = Arc::new(MemoryJournal::default());
    let mut tx = sample_transaction("eth_sol_interrupted", Utc::now());
    tx.source_tx_hash = Some("0xlock".to_string());
    tx.status = Status::Recovering;
    tx.retry_count = tx.max_retries;
    journal.record(&tx, "recovering").await.unwrap();

    let h = Harness::with_journal(Harness::settings(), journal).await;
    let restored = h.store.get("eth_sol_interrupted").await.unwrap();
    assert_eq!(restored.status, Status::AdminReview);
    assert_eq!(h.sink.count_containing("needs admin review"), 1);

    let report = h.recovery.run_cycle().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(h.sol.calls("mint"), 0);
}

#[tokio::test]
async fn quorum_shortfall_recovers_when_signers_return() {
    let h = Harness::ready().await;
    h.validators[2].set_online(false);

    let BridgeError::TransferFailed { tx_id, source } = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err()
    else {
        panic!("expected a transfer failure");
    };
    assert!(matches!(*source, BridgeError::Quorum(_)));

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Locked);
    assert!(tx.error.is_some());
    assert!(tx.signatures.is_empty());
    assert_eq!(h.sol.calls("mint"), 0);

    h.detector
        .scan(Utc::now() + ChronoDuration::minutes(61))
        .await;
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::Stuck);

    h.validators[2].set_online(true);
    let report = h.recovery.run_cycle().await;
    assert_eq!(report.recovered, vec![tx_id.clone()]);

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(tx.signatures.len(), 3);
    assert_eq!(h.eth.calls("lock"), 1);
    assert_eq!(h.sol.calls("mint"), 1);
}

#[tokio::test]
async fn reconcile_records_found_mint_without_minting_again() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    let action = OverrideAction::Reconcile {
        source_tx_hash: None,
        dest_tx_hash: Some("0xmint_on_explorer".to_string()),
        signatures: vec![],
        notes: "mint landed, adapter timed out".to_string(),
    };

    let err = h
        .service
        .override_transaction(&tx_id, action.clone(), "explorer check", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Unauthorized(_)));

    let grant = h.service.elevate("harness-admin-token").unwrap();
    let conflicting = OverrideAction::Reconcile {
        source_tx_hash: Some("0xsomething_else".to_string()),
        dest_tx_hash: None,
        signatures: vec![],
        notes: "wrong lock".to_string(),
    };
    let err = h
        .service
        .override_transaction(&tx_id, conflicting, "explorer check", Some(&grant))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Validation(ValidationError::ConflictingArtifact {
            field: "source_tx_hash"
        })
    ));

    let tx = h
        .service
        .override_transaction(&tx_id, action, "explorer check", Some(&grant))
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(tx.dest_tx_hash.as_deref(), Some("0xmint_on_explorer"));
    assert!(tx.admin_override);
    assert!(tx.admin_notes.unwrap().contains("adapter timed out"));
    assert_eq!(h.eth.calls("lock"), 1);
    assert_eq!(h.sol.calls("mint"), 1);
}

#[tokio::test]
async fn reconcile_supplied_lock_and_signatures_runs_only_the_mint() {
    let h = Harness::ready().await;
    h.eth.fail_always("lock", FailMode::Transient);
    let BridgeError::TransferFailed { tx_id, .. } = h
        .service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap_err()
    else {
        panic!("expected a transfer failure");
    };
    let pending = h.store.get(&tx_id).await.unwrap();
    assert_eq!(pending.status, Status::Pending);

    // Signatures made off-chain by the same validator keys
    let signers = SignatureCollector::new(local_validator_set(3), 3, Duration::from_secs(5));
    let stale = signers.collect(&transfer_digest(&pending)).await.unwrap();
    let mut with_lock = pending.clone();
    with_lock.source_tx_hash = Some("0xlock_on_explorer".to_string());
    let signatures: Vec<ValidatorSignature> =
        signers.collect(&transfer_digest(&with_lock)).await.unwrap();

    let grant = h.service.elevate("harness-admin-token").unwrap();
    let reconcile = |signatures: Vec<ValidatorSignature>| OverrideAction::Reconcile {
        source_tx_hash: Some("0xlock_on_explorer".to_string()),
        dest_tx_hash: None,
        signatures,
        notes: "lock confirmed by chain ops".to_string(),
    };

    // Signatures over the digest without the lock hash do not count
    let err = h
        .service
        .override_transaction(&tx_id, reconcile(stale), "lock found", Some(&grant))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Quorum(_)));
    assert_eq!(h.store.get(&tx_id).await.unwrap().status, Status::Pending);

    let tx = h
        .service
        .override_transaction(&tx_id, reconcile(signatures.clone()), "lock found", Some(&grant))
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(tx.source_tx_hash.as_deref(), Some("0xlock_on_explorer"));
    assert_eq!(tx.signatures, signatures);
    assert_eq!(h.eth.calls("lock"), 1);
    assert_eq!(h.sol.calls("mint"), 1);
}

#[tokio::test]
async fn reconcile_that_still_fails_returns_to_admin_review() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    let grant = h.service.elevate("harness-admin-token").unwrap();

    let err = h
        .service
        .override_transaction(
            &tx_id,
            OverrideAction::Reconcile {
                source_tx_hash: None,
                dest_tx_hash: None,
                signatures: vec![],
                notes: "try the mint once more".to_string(),
            },
            "adapter patched",
            Some(&grant),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ChainCall(_)));

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::AdminReview);
    assert!(tx.error.is_some());
    assert_eq!(h.sol.calls("mint"), 2);
}

#[tokio::test]
async fn unjournaled_mint_parks_transaction_until_reconciled() {
    let h = Harness::ready().await;
    let tx_id = stuck_eth_to_sol(&h).await;
    h.sol.clear_failures();
    h.journal.fail_writes(true);

    let report = h.recovery.run_cycle().await;
    assert_eq!(report.escalated, vec![tx_id.clone()]);

    let tx = h.store.get(&tx_id).await.unwrap();
    assert_eq!(tx.status, Status::AdminReview);
    assert!(tx.dest_tx_hash.is_some());
    assert_eq!(h.sink.count_containing("could not be journaled"), 1);
    assert_eq!(h.sol.calls("mint"), 2);

    // Journal back: reconcile finds the mint already recorded and just finalizes
    h.journal.fail_writes(false);
    let grant = h.service.elevate("harness-admin-token").unwrap();
    let tx = h
        .service
        .override_transaction(
            &tx_id,
            OverrideAction::Reconcile {
                source_tx_hash: None,
                dest_tx_hash: None,
                signatures: vec![],
                notes: "journal restored".to_string(),
            },
            "database back",
            Some(&grant),
        )
        .await
        .unwrap();
    assert_eq!(tx.status, Status::Minted);
    assert_eq!(h.sol.calls("mint"), 2);
    assert!(h
        .journal
        .row(&tx_id)
        .is_some_and(|row| row.dest_tx_hash.is_some()));
}

#[tokio::test]
async fn stats_cover_completed_and_pending() {
    let h = Harness::ready().await;
    h.service
        .initiate_bridge(Direction::EthToSol, dec("10"), "0xsender", "SolRecipient")
        .await
        .unwrap();
    h.service
        .initiate_bridge(Direction::SolToEth, dec("20"), "SolSender", "0xrecipient")
        .await
        .unwrap();
    stuck_eth_to_sol(&h).await;

    let stats = h.service.get_stats().await;
    assert_eq!(stats.total_completed, 2);
    assert_eq!(stats.total_pending, 1);
    assert_eq!(stats.stuck_transactions, 1);
    assert_eq!(stats.total_volume, dec("30"));
    assert_eq!(stats.total_fees, dec("0.03"));
    assert_eq!(stats.by_status["minted"], 1);
    assert_eq!(stats.by_status["released"], 1);
    assert_eq!(stats.by_status["stuck"], 1);
    assert_eq!(stats.validators, 3);
}

proptest! {
    #[test]
    fn fee_split_conserves_amount(cents in 1u64..10_000_000, per_mille in 0u32..1000) {
        let amount = BigDecimal::new(cents.into(), 2);
        let pct = BigDecimal::new(per_mille.into(), 3);
        let (fee, net) = split_fee(&amount, &pct);
        prop_assert_eq!(&fee + &net, amount.clone());
        prop_assert!(fee >= BigDecimal::from(0));
        prop_assert!(net > BigDecimal::from(0));
    }
}
