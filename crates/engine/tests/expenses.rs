use chrono::Utc;
use sea_orm::{Database, DatabaseConnection};

use engine::{
    Engine, EngineError, ExpenseCategory, ExpenseCmd, ExpenseListFilter, Share, SplitSpec,
    UpdateExpenseCmd,
};
use migration::MigratorTrait;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db.clone()).build().await.unwrap();

    for (username, display_name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        engine
            .upsert_user(username, display_name, None)
            .await
            .unwrap();
    }

    (engine, db)
}

/// Group with alice (creator), bob, and carol.
async fn trip_group(engine: &Engine) -> String {
    let group_id = engine.create_group("Goa Trip", "alice", None).await.unwrap();
    engine.add_member(&group_id, "bob", "alice").await.unwrap();
    engine.add_member(&group_id, "carol", "alice").await.unwrap();
    group_id
}

#[tokio::test]
async fn create_group_seeds_creator_membership() {
    let (engine, _db) = engine_with_db().await;
    let group_id = engine.create_group("Flat", "alice", None).await.unwrap();

    let members = engine.list_members(&group_id, "alice").await.unwrap();
    assert_eq!(members, vec!["alice".to_string()]);

    // Non-members see no group at all.
    let err = engine.list_members(&group_id, "bob").await.unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("group not exists".to_string()));
}

#[tokio::test]
async fn equal_split_expense_end_to_end() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    let expense_id = engine
        .create_expense(ExpenseCmd::new(
            &group_id, "alice", "alice", 10_000, "Dinner", Utc::now(),
        ))
        .await
        .unwrap();

    let splits = engine
        .expense_splits(&group_id, expense_id, "alice")
        .await
        .unwrap();
    assert_eq!(splits.len(), 3);
    let total: i64 = splits.iter().map(|s| s.owe_amount_minor).sum();
    assert_eq!(total, 10_000);

    // Participants default to the sorted member list; the rounding cent
    // lands on the first of them.
    let share_of = |user: &str| {
        splits
            .iter()
            .find(|s| s.user_id == user)
            .unwrap()
            .owe_amount_minor
    };
    assert_eq!(share_of("alice"), 3334);
    assert_eq!(share_of("bob"), 3333);
    assert_eq!(share_of("carol"), 3333);

    assert_eq!(engine.net_balance(&group_id, "alice", "alice").await.unwrap(), 6666);
    assert_eq!(engine.net_balance(&group_id, "bob", "alice").await.unwrap(), -3333);

    let matrix = engine.debt_matrix(&group_id, "bob").await.unwrap();
    assert_eq!(matrix["bob"]["alice"], 3333);
    assert_eq!(matrix["alice"]["bob"], -3333);
}

#[tokio::test]
async fn custom_split_is_validated_at_commit() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    let ok = vec![
        Share::new("alice", 7000),
        Share::new("bob", 2000),
        Share::new("carol", 1000),
    ];
    engine
        .create_expense(
            ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Hotel", Utc::now())
                .split(SplitSpec::Custom(ok)),
        )
        .await
        .unwrap();

    let drifted = vec![Share::new("alice", 7000), Share::new("bob", 2000)];
    let err = engine
        .create_expense(
            ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Cab", Utc::now())
                .split(SplitSpec::Custom(drifted)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSplit(_)));

    let negative = vec![Share::new("alice", 11_000), Share::new("bob", -1000)];
    let err = engine
        .create_expense(
            ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Cab", Utc::now())
                .split(SplitSpec::Custom(negative)),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidSplit("split amounts cannot be negative".to_string())
    );
}

#[tokio::test]
async fn expense_validation_rejects_bad_input() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    let err = engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "alice", 0, "Dinner", Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let err = engine
        .create_expense(ExpenseCmd::new(
            &group_id,
            "alice",
            "alice",
            100_000_001,
            "Yacht",
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let err = engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "alice", 1000, "  ", Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidName(_)));

    // The payer has to be a current member.
    let err = engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "dave", 1000, "Dinner", Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}

#[tokio::test]
async fn update_expense_fully_replaces_splits() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    let expense_id = engine
        .create_expense(ExpenseCmd::new(
            &group_id, "alice", "alice", 9000, "Brunch", Utc::now(),
        ))
        .await
        .unwrap();

    engine
        .update_expense(
            UpdateExpenseCmd::new(&group_id, "alice", expense_id, "bob", 6000, "Brunch (fixed)")
                .split(SplitSpec::Custom(vec![
                    Share::new("alice", 4000),
                    Share::new("bob", 2000),
                ])),
        )
        .await
        .unwrap();

    let splits = engine
        .expense_splits(&group_id, expense_id, "bob")
        .await
        .unwrap();
    assert_eq!(splits.len(), 2);
    let total: i64 = splits.iter().map(|s| s.owe_amount_minor).sum();
    assert_eq!(total, 6000);

    let expenses = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].paid_by, "bob");
    assert_eq!(expenses[0].amount_minor, 6000);
    assert_eq!(expenses[0].description, "Brunch (fixed)");
}

#[tokio::test]
async fn delete_expense_cascades_splits() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    let expense_id = engine
        .create_expense(ExpenseCmd::new(
            &group_id, "alice", "alice", 4500, "Taxi", Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .delete_expense(&group_id, expense_id, "alice", false)
        .await
        .unwrap();

    let expenses = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert!(expenses.is_empty());
    assert_eq!(engine.net_balance(&group_id, "alice", "alice").await.unwrap(), 0);
}

#[tokio::test]
async fn balances_conserve_to_zero_across_members() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Dinner", Utc::now()))
        .await
        .unwrap();
    engine
        .create_expense(ExpenseCmd::new(&group_id, "bob", "bob", 4501, "Taxi", Utc::now()))
        .await
        .unwrap();
    engine
        .create_expense(
            ExpenseCmd::new(&group_id, "carol", "carol", 7333, "Museum", Utc::now()).split(
                SplitSpec::Custom(vec![Share::new("alice", 7000), Share::new("carol", 333)]),
            ),
        )
        .await
        .unwrap();

    let balances = engine.group_balances(&group_id, "alice").await.unwrap();
    let total: i64 = balances.net_balances_minor.values().sum();
    assert_eq!(total, 0);
    assert_eq!(balances.total_expenses_minor, 21_834);
}

#[tokio::test]
async fn roster_keeps_tagged_ex_members() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "alice", 9000, "Dinner", Utc::now()))
        .await
        .unwrap();

    // carol leaves after sharing the dinner.
    engine.remove_member(&group_id, "carol", "carol").await.unwrap();

    let roster = engine.group_roster(&group_id, "alice").await.unwrap();
    let carol = roster.iter().find(|m| m.user_id == "carol").unwrap();
    assert!(!carol.is_current_member);
    assert_eq!(carol.display_name, "Carol");

    // Current members sort first.
    assert!(roster.iter().take(2).all(|m| m.is_current_member));

    // Her share still counts in the spending report.
    let shares = engine.spending_shares(&group_id, "alice").await.unwrap();
    let carol_share = shares
        .iter()
        .find(|s| s.member.user_id == "carol")
        .unwrap();
    assert_eq!(carol_share.spent_minor, 3000);
    assert!((carol_share.percentage - 33.33).abs() < 0.1);
}

#[tokio::test]
async fn list_expenses_filters_by_category() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    engine
        .create_expense(ExpenseCmd::new(&group_id, "alice", "alice", 10_000, "Dinner", Utc::now()))
        .await
        .unwrap();

    let only_settlements = engine
        .list_expenses(
            &group_id,
            "alice",
            &ExpenseListFilter {
                category: Some(ExpenseCategory::Settlement),
            },
        )
        .await
        .unwrap();
    assert!(only_settlements.is_empty());

    let only_expenses = engine
        .list_expenses(
            &group_id,
            "alice",
            &ExpenseListFilter {
                category: Some(ExpenseCategory::Expense),
            },
        )
        .await
        .unwrap();
    assert_eq!(only_expenses.len(), 1);
    assert_eq!(only_expenses[0].category, ExpenseCategory::Expense);
}

#[tokio::test]
async fn membership_management_rules() {
    let (engine, _db) = engine_with_db().await;
    let group_id = trip_group(&engine).await;

    // Duplicate add is rejected.
    let err = engine.add_member(&group_id, "bob", "alice").await.unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("bob".to_string()));

    // Only the creator removes someone else.
    let err = engine
        .remove_member(&group_id, "carol", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
    engine.remove_member(&group_id, "carol", "alice").await.unwrap();

    let members = engine.list_members(&group_id, "alice").await.unwrap();
    assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
}
