//! Criterion measurements of fragment compilation per dialect, plus the overhead of
//! pushing lookups through a resolver backed by the in-memory mock adapter.

use std::hint::black_box;
use std::sync::{Arc, LazyLock};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::future::join_all;
use sqlfx::prelude::*;
use sqlfx::test_utils::MockConnector;
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

fn wide_insert(rows: usize) -> Fragment {
    let records = (0..rows).map(|i| {
        record! {
            "id" => i64::try_from(i).unwrap_or_default(),
            "name" => format!("user-{i}"),
            "active" => i % 2 == 0,
        }
    });
    sql!("INSERT INTO {} {}", ident("public.users"), insert(records))
}

fn filtered_select(clauses: usize) -> Fragment {
    let filters = (0..clauses).map(|i| sql!("{} = {}", ident(format!("col_{i}")), i64::try_from(i).unwrap_or_default()));
    sql!(
        "SELECT * FROM {} WHERE {} AND id IN {}",
        ident("events"),
        Fragment::and(filters),
        array(0..64_i64)
    )
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for rows in [1_usize, 100, 1_000] {
        let fragment = wide_insert(rows);
        group.throughput(Throughput::Elements(rows as u64));
        for dialect in [Dialect::Postgres, Dialect::Mssql, Dialect::Sqlite] {
            let compiler = dialect.compiler();
            group.bench_with_input(
                BenchmarkId::new(format!("insert/{}", dialect.name()), rows),
                &fragment,
                |b, fragment| b.iter(|| compiler.compile(black_box(fragment))),
            );
        }
    }

    let fragment = filtered_select(16);
    let compiler = Compiler::postgres();
    group.bench_function("select/nested", |b| {
        b.iter(|| compiler.compile(black_box(&fragment)));
    });
    group.finish();
}

fn bench_resolver(c: &mut Criterion) {
    let connector = MockConnector::new();
    connector.handle("FROM people", |params| {
        let rows = params.iter().map(|id| vec![id.clone()]).collect();
        Ok(ResultSet::from_rows(["id"], rows))
    });
    let client = TOKIO_RUNTIME
        .block_on(Client::new(
            Arc::new(connector),
            ClientConfig::new(Dialect::Postgres),
        ))
        .expect("client");
    let runner = client.batch_runner(|ids: Vec<i64>| {
        sql!("SELECT id FROM people WHERE id IN {}", array(ids)).into()
    });
    let people = Resolver::find_by_id(
        "people",
        runner,
        |row: &Row| row.get("id").and_then(Value::as_int),
        |row: &Row| Ok(row.try_get("id")?.clone()),
    );

    let mut group = c.benchmark_group("resolver");
    for fan_out in [1_i64, 32, 256] {
        group.throughput(Throughput::Elements(fan_out as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fan_out), &fan_out, |b, &n| {
            b.to_async(&*TOKIO_RUNTIME).iter(|| {
                let people = people.clone();
                async move { join_all((0..n).map(|id| people.execute(id))).await }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_resolver);
criterion_main!(benches);
