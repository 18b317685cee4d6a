use chrono::Utc;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

use engine::{
    Engine, EngineError, ExpenseCmd, SettlementCmd, SettlementMethod, SettlementStatus, Share,
    SplitSpec, UpdateSettlementCmd,
};
use migration::MigratorTrait;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db.clone()).build().await.unwrap();

    engine
        .upsert_user("alice", "Alice", Some("alice@upi"))
        .await
        .unwrap();
    engine.upsert_user("bob", "Bob", None).await.unwrap();
    engine.upsert_user("carol", "Carol", None).await.unwrap();

    (engine, db)
}

async fn trip_group(engine: &Engine) -> String {
    let group_id = engine.create_group("Goa Trip", "alice", None).await.unwrap();
    engine.add_member(&group_id, "bob", "alice").await.unwrap();
    engine.add_member(&group_id, "carol", "alice").await.unwrap();
    group_id
}

/// Dinner paid by alice, split equally: bob and carol each owe her 33.33.
async fn dinner(engine: &Engine, group_id: &str) {
    engine
        .create_expense(ExpenseCmd::new(
            group_id, "alice", "alice", 10_000, "Dinner", Utc::now(),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn manual_settlement_lifecycle() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, intent) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();
    assert!(intent.is_none());

    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(view.effective_status(), SettlementStatus::PendingConfirmation);
    assert_eq!(view.receiver, "alice");
    assert_eq!(view.expense.description, "Payment to Alice");
    let details = view.details.unwrap();
    assert_eq!(details.method, SettlementMethod::Manual);
    assert_eq!(details.initiated_by, "bob");

    // A pending payment already moves the balance.
    assert_eq!(engine.net_balance(&group_id, "bob", "bob").await.unwrap(), 0);

    // Manual settlements have no UTR step.
    let err = engine
        .attach_utr(&group_id, settlement_id, "123456789012", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap();

    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    let details = view.details.unwrap();
    assert_eq!(details.status, SettlementStatus::Confirmed);
    assert_eq!(details.confirmed_by.as_deref(), Some("alice"));
    assert!(details.confirmed_at.is_some());
}

#[tokio::test]
async fn upi_settlement_lifecycle_reduces_pair_debt() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    engine
        .create_expense(ExpenseCmd::new(
            &group_id, "alice", "alice", 12_000, "Beach house", Utc::now(),
        ))
        .await
        .unwrap();

    let (settlement_id, intent) = engine
        .create_settlement(
            SettlementCmd::new(
                &group_id,
                "bob",
                "bob",
                "alice",
                4000,
                SettlementMethod::Upi,
                Utc::now(),
            )
            .note("Trip dues"),
        )
        .await
        .unwrap();

    let intent = intent.unwrap();
    assert_eq!(
        intent.uri,
        "upi://pay?pa=alice@upi&pn=Alice&am=40.00&cu=INR&tn=Trip%20dues"
    );

    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(view.effective_status(), SettlementStatus::PendingUtr);

    // Bad references never leave pending_utr.
    for bad in ["12345678901", "12345678901234567", "12a456789012"] {
        let err = engine
            .attach_utr(&group_id, settlement_id, bad, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidUtr(_)), "utr {bad}");
    }
    // Confirmation cannot jump the UTR step.
    let err = engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    engine
        .attach_utr(&group_id, settlement_id, "123456789012", "bob")
        .await
        .unwrap();
    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(view.effective_status(), SettlementStatus::PendingConfirmation);
    assert_eq!(
        view.details.unwrap().utr_reference.as_deref(),
        Some("123456789012")
    );

    engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap();

    // 40.00 paid: bob's debt towards alice is cleared.
    let matrix = engine.debt_matrix(&group_id, "bob").await.unwrap();
    assert_eq!(matrix["bob"]["alice"], 0);
    assert_eq!(matrix["carol"]["alice"], 4000);
}

#[tokio::test]
async fn upi_requires_receiver_handle() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    engine
        .create_expense(ExpenseCmd::new(
            &group_id, "bob", "bob", 9000, "Groceries", Utc::now(),
        ))
        .await
        .unwrap();

    // carol owes bob, but bob has no UPI handle registered.
    let err = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "carol",
            "carol",
            "bob",
            3000,
            SettlementMethod::Upi,
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingUpiHandle(_)));

    // Manual settlement stays available as the fallback.
    engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "carol",
            "carol",
            "bob",
            3000,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn create_guard_caps_amount_at_outstanding_debt() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    // bob owes alice 33.33; settling 34.00 is over the cap.
    let err = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3400,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    // carol owes alice, not the other way round.
    let err = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "alice",
            "alice",
            "carol",
            100,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
}

#[tokio::test]
async fn over_settlement_needs_explicit_override() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    // bob owes alice exactly 50.00.
    engine
        .create_expense(
            ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Dinner", Utc::now()).split(
                SplitSpec::Custom(vec![Share::new("alice", 5000), Share::new("bob", 5000)]),
            ),
        )
        .await
        .unwrap();

    let (first, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3000,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();

    // A second 30.00 settlement slips in against a temporary debt bump
    // that is later deleted — the way over-settlement actually arises with
    // an advisory guard.
    let bump = engine
        .create_expense(
            ExpenseCmd::new(&group_id, "alice", "alice", 3000, "Parking", Utc::now()).split(
                SplitSpec::Custom(vec![Share::new("alice", 0), Share::new("bob", 3000)]),
            ),
        )
        .await
        .unwrap();
    let (second, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3000,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();
    engine.delete_expense(&group_id, bump, "alice", false).await.unwrap();

    // Dry run: 60.00 pending against an actual debt of 50.00.
    let check = engine
        .check_over_settlement(&group_id, second, "alice")
        .await
        .unwrap();
    assert!(check.is_over);
    assert_eq!(check.actual_minor, 5000);
    assert_eq!(check.pending_minor, 6000);

    let err = engine
        .confirm_settlement(&group_id, second, "alice", false, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::OverSettlement {
            actual_minor: 5000,
            pending_minor: 6000,
        }
    );

    // The explicit override commits anyway.
    engine
        .confirm_settlement(&group_id, second, "alice", true, Utc::now())
        .await
        .unwrap();
    let view = engine
        .settlement_view(&group_id, second, "alice")
        .await
        .unwrap();
    assert_eq!(view.effective_status(), SettlementStatus::Confirmed);

    // The first settlement is not over by itself once the second is the
    // one counted against it, so confirming it still trips the same check.
    let err = engine
        .confirm_settlement(&group_id, first, "alice", false, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OverSettlement { .. }));
}

#[tokio::test]
async fn cancel_is_flag_only_and_restores_balance() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();
    assert_eq!(engine.net_balance(&group_id, "bob", "bob").await.unwrap(), 0);

    let err = engine
        .cancel_settlement(&group_id, settlement_id, "   ", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidName(_)));

    engine
        .cancel_settlement(&group_id, settlement_id, "Wrong amount", "bob")
        .await
        .unwrap();

    // The record survives for audit, with the reason stored...
    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(view.effective_status(), SettlementStatus::Cancelled);
    assert_eq!(
        view.details.unwrap().cancellation_reason.as_deref(),
        Some("Wrong amount")
    );

    // ...but the ledger effect is gone.
    assert_eq!(engine.net_balance(&group_id, "bob", "bob").await.unwrap(), -3333);
    let matrix = engine.debt_matrix(&group_id, "bob").await.unwrap();
    assert_eq!(matrix["bob"]["alice"], 3333);

    // Cancelled is terminal.
    let err = engine
        .cancel_settlement(&group_id, settlement_id, "Again", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    let err = engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn transitions_are_role_gated() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Upi,
            Utc::now(),
        ))
        .await
        .unwrap();

    // Only the payer attaches the UTR.
    let err = engine
        .attach_utr(&group_id, settlement_id, "123456789012", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
    engine
        .attach_utr(&group_id, settlement_id, "123456789012", "bob")
        .await
        .unwrap();

    // Only the receiver confirms.
    let err = engine
        .confirm_settlement(&group_id, settlement_id, "bob", false, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));

    // Uninvolved members cannot cancel.
    let err = engine
        .cancel_settlement(&group_id, settlement_id, "Not mine", "carol")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
}

#[tokio::test]
async fn update_keeps_state_and_freezes_after_confirm() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();

    engine
        .update_settlement(UpdateSettlementCmd::new(
            &group_id,
            "bob",
            settlement_id,
            "alice",
            2000,
        ))
        .await
        .unwrap();

    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(view.expense.amount_minor, 2000);
    assert_eq!(view.effective_status(), SettlementStatus::PendingConfirmation);

    let splits = engine
        .expense_splits(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0].user_id, "alice");
    assert_eq!(splits[0].owe_amount_minor, 2000);

    // Editing above the outstanding debt is rejected like creation.
    let err = engine
        .update_settlement(UpdateSettlementCmd::new(
            &group_id,
            "bob",
            settlement_id,
            "alice",
            3400,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap();

    // Confirmed settlements are frozen.
    let err = engine
        .update_settlement(UpdateSettlementCmd::new(
            &group_id,
            "bob",
            settlement_id,
            "alice",
            1000,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn deleting_a_confirmed_settlement_requires_force() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap();

    let err = engine
        .delete_expense(&group_id, settlement_id, "bob", false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    engine
        .delete_expense(&group_id, settlement_id, "bob", true)
        .await
        .unwrap();
    assert_eq!(engine.net_balance(&group_id, "bob", "bob").await.unwrap(), -3333);
}

#[tokio::test]
async fn legacy_settlement_without_details_is_read_only() {
    let (engine, db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;
    dinner(&engine, &group_id).await;

    let (settlement_id, _) = engine
        .create_settlement(SettlementCmd::new(
            &group_id,
            "bob",
            "bob",
            "alice",
            3333,
            SettlementMethod::Manual,
            Utc::now(),
        ))
        .await
        .unwrap();

    // Strip the details row, leaving a record as written before the
    // lifecycle table existed.
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "DELETE FROM settlement_details WHERE expense_id = ?",
        vec![settlement_id.to_string().into()],
    ))
    .await
    .unwrap();

    // Reads as unconditionally confirmed...
    let view = engine
        .settlement_view(&group_id, settlement_id, "bob")
        .await
        .unwrap();
    assert!(view.details.is_none());
    assert_eq!(view.effective_status(), SettlementStatus::Confirmed);

    // ...still counts towards balances...
    assert_eq!(engine.net_balance(&group_id, "bob", "bob").await.unwrap(), 0);

    // ...and accepts no transitions.
    let err = engine
        .confirm_settlement(&group_id, settlement_id, "alice", false, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    let err = engine
        .cancel_settlement(&group_id, settlement_id, "Oops", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}
