use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use asupersync::runtime::RuntimeBuilder;

use sqlbridge::prelude::*;
use sqlbridge::{Driver, ToQueryNode};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

async fn count(db: &Database<OpSqliteDialect>, cx: &Cx) -> i64 {
    let result = unwrap_outcome(db.execute(cx, &Query::raw("SELECT COUNT(*) AS n FROM account")).await);
    result.first().unwrap().get_named::<i64>("n").unwrap()
}

async fn setup(db: &Database<OpSqliteDialect>, cx: &Cx) {
    unwrap_outcome(
        db.execute(
            cx,
            &Query::raw("CREATE TABLE account (id INTEGER PRIMARY KEY, owner TEXT NOT NULL UNIQUE)"),
        )
        .await,
    );
}

fn insert(owner: &str) -> impl ToQueryNode + Sync {
    Query::insert_into("account").values([("owner", Value::from(owner))])
}

#[test]
fn commit_persists_writes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));

    rt.block_on(async {
        setup(&db, &cx).await;
        let tx = unwrap_outcome(db.begin(&cx).await);
        unwrap_outcome(tx.execute(&cx, &insert("ann")).await);
        unwrap_outcome(tx.execute(&cx, &insert("bob")).await);
        unwrap_outcome(tx.commit(&cx).await);

        assert_eq!(count(&db, &cx).await, 2);
    });
}

#[test]
fn rollback_discards_writes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));

    rt.block_on(async {
        setup(&db, &cx).await;
        let tx = unwrap_outcome(db.begin(&cx).await);
        unwrap_outcome(tx.execute(&cx, &insert("ann")).await);
        unwrap_outcome(tx.rollback(&cx).await);

        assert_eq!(count(&db, &cx).await, 0);
    });
}

#[test]
fn failed_statement_leaves_transaction_usable() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));

    rt.block_on(async {
        setup(&db, &cx).await;
        let tx = unwrap_outcome(db.begin(&cx).await);
        unwrap_outcome(tx.execute(&cx, &insert("ann")).await);
        let Outcome::Err(e) = tx.execute(&cx, &insert("ann")).await else {
            panic!("duplicate owner should fail");
        };
        assert!(e.is_constraint_violation());
        unwrap_outcome(tx.execute(&cx, &insert("bob")).await);
        unwrap_outcome(tx.commit(&cx).await);

        assert_eq!(count(&db, &cx).await, 2);
    });
}

#[test]
fn dropped_transaction_rolls_back_and_frees_the_connection() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));

    rt.block_on(async {
        setup(&db, &cx).await;
        {
            let tx = unwrap_outcome(db.begin(&cx).await);
            unwrap_outcome(tx.execute(&cx, &insert("ann")).await);
        }

        assert_eq!(count(&db, &cx).await, 0);

        // a fresh transaction can start, so no BEGIN was left open
        let tx = unwrap_outcome(db.begin(&cx).await);
        unwrap_outcome(tx.execute(&cx, &insert("bob")).await);
        unwrap_outcome(tx.commit(&cx).await);
        assert_eq!(count(&db, &cx).await, 1);
    });
}

/// Poll a future that must finish without waiting.
fn ready<F: Future>(future: F) -> F::Output {
    let mut task = Context::from_waker(Waker::noop());
    match pin!(future).poll(&mut task) {
        Poll::Ready(output) => output,
        Poll::Pending => panic!("future unexpectedly waiting"),
    }
}

#[test]
fn statements_wait_for_an_open_transaction() {
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));
    let mut task = Context::from_waker(Waker::noop());

    ready(setup(&db, &cx));
    let tx = unwrap_outcome(ready(db.begin(&cx)));
    unwrap_outcome(ready(tx.execute(&cx, &insert("ann"))));

    let query = Query::select("account");
    let mut waiting = pin!(db.execute(&cx, &query));
    assert!(waiting.as_mut().poll(&mut task).is_pending());
    assert!(waiting.as_mut().poll(&mut task).is_pending());

    unwrap_outcome(ready(tx.commit(&cx)));

    let Poll::Ready(outcome) = waiting.as_mut().poll(&mut task) else {
        panic!("statement should run once the transaction released the lock");
    };
    assert_eq!(unwrap_outcome(outcome).rows.len(), 1);
}

#[test]
fn waiters_are_served_in_order() {
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));
    let driver = db.driver();
    let mut task = Context::from_waker(Waker::noop());

    let first = unwrap_outcome(ready(driver.acquire_connection(&cx)));

    let mut second = pin!(driver.acquire_connection(&cx));
    let mut third = pin!(driver.acquire_connection(&cx));
    assert!(second.as_mut().poll(&mut task).is_pending());
    assert!(third.as_mut().poll(&mut task).is_pending());

    unwrap_outcome(ready(driver.release_connection(&cx, first)));
    assert!(third.as_mut().poll(&mut task).is_pending());
    let Poll::Ready(second) = second.as_mut().poll(&mut task) else {
        panic!("second acquirer should be served first");
    };
    let second = unwrap_outcome(second);
    assert!(third.as_mut().poll(&mut task).is_pending());

    unwrap_outcome(ready(driver.release_connection(&cx, second)));
    let Poll::Ready(third) = third.as_mut().poll(&mut task) else {
        panic!("third acquirer should be served next");
    };
    unwrap_outcome(ready(driver.release_connection(&cx, unwrap_outcome(third))));
}

#[test]
fn disabled_mutex_hands_out_concurrent_leases() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(OpSqliteDialect::new(
        OpSqliteConfig::memory().disable_mutex(true),
    ));
    let driver = db.driver();

    rt.block_on(async {
        let first = unwrap_outcome(driver.acquire_connection(&cx).await);
        let second = unwrap_outcome(driver.acquire_connection(&cx).await);
        unwrap_outcome(driver.release_connection(&cx, first).await);
        unwrap_outcome(driver.release_connection(&cx, second).await);
    });
}
