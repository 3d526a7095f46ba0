#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use sqlfx::prelude::*;
use sqlfx::test_utils::MockConnector;

const PEOPLE: [(i64, &str); 3] = [(1, "ada"), (2, "grace"), (3, "edsger")];

/// Answers `... FROM people ...` with the known people among the bound ids.
fn people_backend() -> MockConnector {
    let connector = MockConnector::new();
    connector.handle("FROM people", |params| {
        let rows = params
            .iter()
            .filter_map(Value::as_int)
            .filter_map(|id| PEOPLE.iter().find(|(pid, _)| *pid == id))
            .map(|(id, name)| vec![Value::Int(*id), Value::from(*name)])
            .collect();
        Ok(ResultSet::from_rows(["id", "name"], rows))
    });
    connector
}

async fn client(connector: &MockConnector) -> Client {
    Client::new(
        Arc::new(connector.clone()),
        ClientConfig::new(Dialect::Postgres).with_pool(PoolConfig::new(0, 4)),
    )
    .await
    .expect("client should build")
}

fn people_runner(client: &Client) -> BatchRunner<i64> {
    client.batch_runner(|ids: Vec<i64>| {
        sql!("SELECT id, name FROM people WHERE id IN {}", array(ids)).into()
    })
}

fn row_id(row: &Row) -> Option<i64> {
    row.get("id").and_then(Value::as_int)
}

fn name(row: &Row) -> Result<String, SqlFxError> {
    row.try_get("name")?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| SqlFxError::DecodeError("name is not text".to_string()))
}

#[tokio::test]
async fn concurrent_lookups_share_one_query() {
    let connector = people_backend();
    let client = client(&connector).await;
    let people = Resolver::find_by_id("people", people_runner(&client), row_id, name);

    let (a, b, c, again) = tokio::join!(
        people.execute(2),
        people.execute(9),
        people.execute(1),
        people.execute(2),
    );

    assert_eq!(a.unwrap().as_deref(), Some("grace"));
    assert_eq!(b.unwrap(), None);
    assert_eq!(c.unwrap().as_deref(), Some("ada"));
    assert_eq!(again.unwrap().as_deref(), Some("grace"));

    let log = connector.sql_log();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].sql,
        "SELECT id, name FROM people WHERE id IN ($1,$2,$3)"
    );
    assert_eq!(log[0].params, vec![Value::Int(2), Value::Int(9), Value::Int(1)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_on_a_multi_thread_runtime_is_one_query() {
    for _ in 0..50 {
        let connector = people_backend();
        let client = client(&connector).await;
        let people = Resolver::find_by_id("people", people_runner(&client), row_id, name);

        let (a, b, c) = tokio::join!(people.execute(1), people.execute(2), people.execute(3));
        assert_eq!(a.unwrap().as_deref(), Some("ada"));
        assert_eq!(b.unwrap().as_deref(), Some("grace"));
        assert_eq!(c.unwrap().as_deref(), Some("edsger"));
        assert_eq!(connector.sql_log().len(), 1);

        let found = futures_util::future::join_all((0..60).map(|id| people.execute(id))).await;
        assert_eq!(found.iter().filter(|r| matches!(r, Ok(Some(_)))).count(), 3);
        assert_eq!(connector.sql_log().len(), 2);
    }
}

#[tokio::test]
async fn positional_batches_must_return_one_row_per_input() {
    let connector = people_backend();
    let client = client(&connector).await;
    let people = Resolver::ordered("people_ordered", people_runner(&client), name);

    let results = people.execute_all([1, 2, 42]).await;
    assert_eq!(results.len(), 3);
    for result in results {
        assert!(matches!(
            result,
            Err(SqlFxError::ResultLengthMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    let results = people.execute_all([3, 1]).await;
    let names: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(names, vec!["edsger", "ada"]);
}

#[tokio::test]
async fn grouped_requests_get_every_matching_row() {
    let connector = MockConnector::new();
    connector.handle("FROM pets", |_| {
        Ok(ResultSet::from_rows(
            ["owner_id", "pet"],
            vec![
                vec![Value::Int(1), Value::from("cat")],
                vec![Value::Int(2), Value::from("dog")],
                vec![Value::Int(1), Value::from("fish")],
            ],
        ))
    });
    let client = client(&connector).await;
    let runner = client.batch_runner(|owners: Vec<i64>| {
        sql!("SELECT owner_id, pet FROM pets WHERE owner_id IN {}", array(owners)).into()
    });
    let pets = Resolver::grouped(
        "pets_by_owner",
        runner,
        |row: &Row| row.get("owner_id").and_then(Value::as_int),
        |row: &Row| Ok(row.try_get("pet")?.as_text().unwrap_or_default().to_string()),
    );

    let results = pets.execute_all([1, 2, 3]).await;
    let pets: Vec<Vec<String>> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(pets[0], vec!["cat", "fish"]);
    assert_eq!(pets[1], vec!["dog"]);
    assert!(pets[2].is_empty());
    assert_eq!(connector.count_matching("FROM pets"), 1);
}

#[tokio::test]
async fn void_batches_fail_together() {
    let connector = MockConnector::new();
    connector.fail_on("INSERT INTO events", "events table is full");
    let client = client(&connector).await;
    let runner = client.batch_runner(|names: Vec<String>| {
        let rows = names.into_iter().map(|name| record! { "name" => name });
        sql!("INSERT INTO events {}", insert(rows)).into()
    });
    let log_event = Resolver::void("log_event", runner);

    let (a, b) = tokio::join!(
        log_event.execute("signup".to_string()),
        log_event.execute("login".to_string()),
    );
    assert!(matches!(a, Err(SqlFxError::ExecutionError { .. })));
    assert!(matches!(b, Err(SqlFxError::ExecutionError { .. })));
    assert_eq!(
        connector.statements(),
        vec!["INSERT INTO events (\"name\") VALUES ($1),($2)"]
    );
}

#[tokio::test]
async fn cached_lookups_skip_the_database() {
    let connector = people_backend();
    let client = client(&connector).await;
    let people = Resolver::find_by_id("people", people_runner(&client), row_id, name).with_cache();

    assert_eq!(people.execute(1).await.unwrap().as_deref(), Some("ada"));
    assert_eq!(people.execute(1).await.unwrap().as_deref(), Some("ada"));
    assert_eq!(connector.count_matching("FROM people"), 1);

    people.populate_cache(7, Some("primed".to_string()));
    assert_eq!(people.execute(7).await.unwrap().as_deref(), Some("primed"));
    assert_eq!(connector.count_matching("FROM people"), 1);

    people.invalidate_cache(&1);
    people.execute(1).await.unwrap();
    assert_eq!(connector.count_matching("FROM people"), 2);
}

#[tokio::test]
async fn window_and_batch_size_shape_the_batches() {
    let connector = people_backend();
    let client = client(&connector).await;
    let people = Resolver::find_by_id("people", people_runner(&client), row_id, name)
        .with_window(Duration::from_millis(30))
        .with_max_batch_size(2);

    let results = people.execute_all([1, 2, 3]).await;
    assert!(results.iter().all(Result::is_ok));

    let mut batch_sizes: Vec<usize> = connector
        .sql_log()
        .iter()
        .map(|entry| entry.params.len())
        .collect();
    batch_sizes.sort_unstable();
    assert_eq!(batch_sizes, vec![1, 2]);
}
