use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Value};

use engine::{AccountRole, Engine, EngineError, Money, NewAccountCmd, TransferCmd};
use migration::MigratorTrait;
use uuid::Uuid;

/// In-memory database on a single pooled connection: every connection to
/// `sqlite::memory:` would otherwise open its own empty database.
async fn connect() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

/// File database with two pooled connections, so one can stay busy inside a
/// unit of work while the other reads.
async fn file_db() -> (DatabaseConnection, PathBuf) {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("engine_{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", path.display()));
    options.max_connections(2).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    (db, path)
}

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = connect().await;
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

async fn open(engine: &Engine, id: i64, balance: &str) {
    engine
        .create_account(NewAccountCmd::new(id, balance))
        .await
        .unwrap();
}

async fn balance(engine: &Engine, id: i64) -> String {
    engine.account(id).await.unwrap().balance.to_string()
}

async fn total(engine: &Engine, ids: &[i64]) -> Money {
    let mut sum = Money::ZERO;
    for id in ids {
        sum = sum
            .checked_add(engine.account(*id).await.unwrap().balance)
            .unwrap();
    }
    sum
}

#[tokio::test]
async fn transfer_moves_funds_and_records_the_ledger_row() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 100, "100.00").await;
    open(&engine, 200, "50.00").await;

    let transfer = engine
        .transfer(TransferCmd::new(100, 200, "100.00"))
        .await
        .unwrap();

    assert_eq!(balance(&engine, 100).await, "0");
    assert_eq!(balance(&engine, 200).await, "150");

    let stored = engine.transfer_by_id(transfer.id).await.unwrap();
    assert_eq!(stored.source_account_id, 100);
    assert_eq!(stored.destination_account_id, 200);
    assert_eq!(stored.amount.to_string(), "100");
    assert_eq!(engine.account_transfers(100, 50).await.unwrap().len(), 1);

    let err = engine
        .transfer(TransferCmd::new(100, 200, "0.01"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientFunds {
            account_id: 100,
            ..
        }
    ));
    assert_eq!(engine.account_transfers(100, 50).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exact_balance_empties_the_source() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 1, "12.34567891").await;
    open(&engine, 2, "0").await;

    let err = engine
        .transfer(TransferCmd::new(1, 2, "12.34567892"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientFunds {
            account_id: 1,
            balance: "12.34567891".parse().unwrap(),
            amount: "12.34567892".parse().unwrap(),
        }
    );

    engine
        .transfer(TransferCmd::new(1, 2, "12.34567891"))
        .await
        .unwrap();
    assert_eq!(balance(&engine, 1).await, "0");
    assert_eq!(balance(&engine, 2).await, "12.34567891");

    let err = engine
        .transfer(TransferCmd::new(1, 2, "0.00000001"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
}

#[tokio::test]
async fn large_balances_move_exactly() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 1, "5").await;
    open(&engine, 2, "92233720368").await;

    engine.transfer(TransferCmd::new(1, 2, "1")).await.unwrap();
    engine
        .transfer(TransferCmd::new(1, 2, "0.00000001"))
        .await
        .unwrap();
    assert_eq!(balance(&engine, 2).await, "92233720369.00000001");
    assert_eq!(balance(&engine, 1).await, "3.99999999");

    let transfer = engine
        .transfer(TransferCmd::new(2, 1, "92233720369"))
        .await
        .unwrap();
    assert_eq!(transfer.amount.to_string(), "92233720369");
    assert_eq!(
        engine.transfer_by_id(transfer.id).await.unwrap().amount,
        transfer.amount
    );
    assert_eq!(balance(&engine, 1).await, "92233720372.99999999");
    assert_eq!(balance(&engine, 2).await, "0.00000001");
}

#[tokio::test]
async fn credit_past_the_largest_amount_is_rejected() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 1, "1").await;
    open(&engine, 2, "792281625142643375935.43950335").await;

    let err = engine
        .transfer(TransferCmd::new(1, 2, "0.00000001"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
    assert_eq!(balance(&engine, 1).await, "1");
    assert!(engine.account_transfers(1, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn balances_are_conserved() {
    let (engine, _db) = engine_with_db().await;
    let ids = [1, 2, 3];
    open(&engine, 1, "10.1").await;
    open(&engine, 2, "0.00000003").await;
    open(&engine, 3, "7").await;
    let before = total(&engine, &ids).await;

    let moves = [
        (1, 2, "0.1"),
        (2, 3, "0.00000002"),
        (3, 1, "6.99999999"),
        (1, 3, "0.33333333"),
        (2, 1, "0.1"),
    ];
    for (source, destination, amount) in moves {
        engine
            .transfer(TransferCmd::new(source, destination, amount))
            .await
            .unwrap();
    }
    // A rejected transfer changes nothing either.
    assert!(
        engine
            .transfer(TransferCmd::new(2, 3, "1000"))
            .await
            .is_err()
    );

    assert_eq!(total(&engine, &ids).await, before);
    assert_eq!(balance(&engine, 2).await, "0.00000001");
}

#[tokio::test]
async fn failure_after_the_debit_rolls_everything_back() {
    let (engine, db) = engine_with_db().await;
    open(&engine, 1, "100").await;
    open(&engine, 2, "5").await;

    // The source row is updated first, so this fails the credit only.
    db.execute_unprepared(
        "CREATE TRIGGER fail_credit BEFORE UPDATE ON accounts WHEN NEW.id = 2 \
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .await
    .unwrap();

    let err = engine
        .transfer(TransferCmd::new(1, 2, "40"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Database(_)));
    assert_eq!(balance(&engine, 1).await, "100");
    assert_eq!(balance(&engine, 2).await, "5");
    assert!(engine.account_transfers(1, 50).await.unwrap().is_empty());

    db.execute_unprepared("DROP TRIGGER fail_credit")
        .await
        .unwrap();
    engine.transfer(TransferCmd::new(1, 2, "40")).await.unwrap();
    assert_eq!(balance(&engine, 1).await, "60");
    assert_eq!(balance(&engine, 2).await, "45");
}

#[tokio::test]
async fn failing_ledger_insert_keeps_balances() {
    let (engine, db) = engine_with_db().await;
    open(&engine, 1, "100").await;
    open(&engine, 2, "0").await;

    db.execute_unprepared(
        "CREATE TRIGGER fail_ledger BEFORE INSERT ON transactions \
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .await
    .unwrap();

    assert!(matches!(
        engine.transfer(TransferCmd::new(1, 2, "1")).await,
        Err(EngineError::Database(_))
    ));
    assert_eq!(balance(&engine, 1).await, "100");
    assert_eq!(balance(&engine, 2).await, "0");
}

#[tokio::test]
async fn duplicate_transaction_id_is_a_conflict() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 1, "10").await;
    open(&engine, 2, "0").await;
    let id = Uuid::new_v4();

    let first = engine
        .transfer(TransferCmd::new(1, 2, "3").transaction_id(id))
        .await
        .unwrap();
    assert_eq!(first.id, id);

    let err = engine
        .transfer(TransferCmd::new(1, 2, "3").transaction_id(id))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ExistingTransfer(id));
    assert_eq!(balance(&engine, 1).await, "7");
    assert_eq!(balance(&engine, 2).await, "3");
}

#[tokio::test]
async fn missing_accounts_are_reported_by_role() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 50, "10").await;

    // 999 sorts after 50, 1 before it: the role must not follow lock order.
    let err = engine
        .transfer(TransferCmd::new(50, 999, "1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::AccountNotFound {
            role: AccountRole::Destination,
            account_id: 999
        }
    );

    let err = engine
        .transfer(TransferCmd::new(50, 1, "1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::AccountNotFound {
            role: AccountRole::Destination,
            account_id: 1
        }
    );

    let err = engine
        .transfer(TransferCmd::new(1, 50, "1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::AccountNotFound {
            role: AccountRole::Source,
            account_id: 1
        }
    );

    assert_eq!(balance(&engine, 50).await, "10");
}

#[tokio::test]
async fn validation_fails_before_touching_storage() {
    let db = connect().await;
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    // Without tables any storage access would fail with a database error.
    db.execute_unprepared("DROP TABLE transactions")
        .await
        .unwrap();
    db.execute_unprepared("DROP TABLE accounts").await.unwrap();

    assert_eq!(
        engine.transfer(TransferCmd::new(7, 7, "1")).await,
        Err(EngineError::SameAccount)
    );
    assert!(matches!(
        engine.transfer(TransferCmd::new(7, 8, "ten")).await,
        Err(EngineError::InvalidDecimal(_))
    ));
    assert!(matches!(
        engine.transfer(TransferCmd::new(7, 8, "0.000000001")).await,
        Err(EngineError::InvalidDecimal(_))
    ));
    assert!(matches!(
        engine.transfer(TransferCmd::new(7, 8, "-3")).await,
        Err(EngineError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn opposite_concurrent_transfers_both_complete() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 10, "1000").await;
    open(&engine, 20, "1000").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        let (source, destination) = if i % 2 == 0 { (10, 20) } else { (20, 10) };
        handles.push(tokio::spawn(async move {
            engine
                .transfer(TransferCmd::new(source, destination, "1.5"))
                .await
        }));
    }

    let all = join_transfers(handles);
    let results = tokio::time::timeout(Duration::from_secs(10), all)
        .await
        .expect("transfers deadlocked");
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(balance(&engine, 10).await, "1000");
    assert_eq!(balance(&engine, 20).await, "1000");
    assert_eq!(engine.account_transfers(10, 500).await.unwrap().len(), 20);
}

async fn join_transfers(
    handles: Vec<tokio::task::JoinHandle<Result<engine::Transfer, EngineError>>>,
) -> Vec<Result<engine::Transfer, EngineError>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn accounts_are_locked_in_ascending_id_order() {
    let mut db = connect().await;
    let reads: Arc<Mutex<Vec<i64>>> = Arc::default();
    let log = Arc::clone(&reads);
    db.set_metric_callback(move |info| {
        let sql = &info.statement.sql;
        if !sql.starts_with("SELECT") || !sql.contains(r#"FROM "accounts""#) {
            return;
        }
        let id = info
            .statement
            .values
            .iter()
            .flat_map(|values| values.0.iter())
            .find_map(|value| match value {
                Value::BigInt(Some(id)) => Some(*id),
                _ => None,
            });
        if let Some(id) = id {
            log.lock().unwrap().push(id);
        }
    });
    let engine = Engine::builder().database(db).build().await.unwrap();
    open(&engine, 100, "10").await;
    open(&engine, 200, "10").await;

    for (source, destination) in [(200, 100), (100, 200)] {
        reads.lock().unwrap().clear();
        engine
            .transfer(TransferCmd::new(source, destination, "1"))
            .await
            .unwrap();
        assert_eq!(
            *reads.lock().unwrap(),
            vec![100, 200],
            "transfer {source} -> {destination}"
        );
    }
}

#[tokio::test]
async fn transfer_deadline_rolls_back_written_balances() {
    let (db, path) = file_db().await;
    let engine = Engine::builder()
        .database(db.clone())
        .transfer_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    open(&engine, 1, "10").await;
    open(&engine, 2, "0").await;

    // Both balance updates go through, then the ledger insert spins on a
    // 250^3 row join until well past the deadline.
    db.execute_unprepared("CREATE TABLE spin (n INTEGER NOT NULL)")
        .await
        .unwrap();
    db.execute_unprepared(
        "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 250) \
         INSERT INTO spin SELECT n FROM c",
    )
    .await
    .unwrap();
    db.execute_unprepared(
        "CREATE TRIGGER slow_ledger BEFORE INSERT ON transactions \
         BEGIN SELECT count(*) FROM spin a, spin b, spin c; END;",
    )
    .await
    .unwrap();

    let err = engine
        .transfer(TransferCmd::new(1, 2, "4"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Timeout);

    // The abandoned unit of work still holds its write lock; readers see
    // the committed state only.
    assert_eq!(balance(&engine, 1).await, "10");
    assert_eq!(balance(&engine, 2).await, "0");
    assert!(engine.account_transfers(1, 50).await.unwrap().is_empty());

    // Each attempt waits out the busy timeout until the rollback lands.
    let mut dropped = false;
    for _ in 0..10 {
        if db.execute_unprepared("DROP TRIGGER slow_ledger").await.is_ok() {
            dropped = true;
            break;
        }
    }
    assert!(dropped);

    assert_eq!(balance(&engine, 1).await, "10");
    assert_eq!(balance(&engine, 2).await, "0");
    engine.transfer(TransferCmd::new(1, 2, "4")).await.unwrap();
    assert_eq!(balance(&engine, 1).await, "6");
    assert_eq!(balance(&engine, 2).await, "4");

    drop(engine);
    drop(db);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn history_is_newest_first_and_bounded() {
    let (engine, _db) = engine_with_db().await;
    open(&engine, 1, "100").await;
    open(&engine, 2, "100").await;
    open(&engine, 3, "100").await;

    let mut ids = Vec::new();
    for (source, destination) in [(1, 2), (2, 1), (3, 2), (1, 3)] {
        let transfer = engine
            .transfer(TransferCmd::new(source, destination, "1"))
            .await
            .unwrap();
        ids.push(transfer.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let history: Vec<Uuid> = engine
        .account_transfers(1, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(history, vec![ids[3], ids[1], ids[0]]);

    let page = engine.account_transfers(2, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, ids[2]);

    // Zero is clamped up to one row.
    assert_eq!(engine.account_transfers(2, 0).await.unwrap().len(), 1);

    assert_eq!(
        engine.account_transfers(42, 10).await.unwrap_err(),
        EngineError::AccountNotFound {
            role: AccountRole::Account,
            account_id: 42
        }
    );
}

#[tokio::test]
async fn unknown_transfer_is_not_found() {
    let (engine, _db) = engine_with_db().await;
    let id = Uuid::new_v4();
    assert_eq!(
        engine.transfer_by_id(id).await.unwrap_err(),
        EngineError::TransferNotFound(id)
    );
}

#[tokio::test]
async fn storage_rejects_invalid_ledger_rows() {
    let (engine, db) = engine_with_db().await;
    open(&engine, 1, "10").await;
    open(&engine, 2, "0").await;

    let insert = |id: &str, source: i64, destination: i64, amount: &str| {
        format!(
            "INSERT INTO transactions \
             (id, source_account_id, destination_account_id, amount, created_at) \
             VALUES ('{id}', {source}, {destination}, '{amount}', '2026-01-01T00:00:00+00:00')"
        )
    };

    assert!(db.execute_unprepared(&insert("a", 1, 2, "0")).await.is_err());
    assert!(db.execute_unprepared(&insert("b", 1, 2, "-1")).await.is_err());
    assert!(db.execute_unprepared(&insert("c", 1, 1, "1")).await.is_err());

    db.execute_unprepared(&insert("d", 1, 2, "0.00000001"))
        .await
        .unwrap();
    let stored = db
        .query_one(sea_orm::Statement::from_string(
            db.get_database_backend(),
            "SELECT count(*) AS n FROM transactions",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.try_get::<i64>("", "n").unwrap(), 1);
}
