use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

include!("../src/shared.rs");

fn client_field_in_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_field_in_list");
    for item_count in ITEM_COUNTS {
        let data = list_response(item_count);
        for (name, query) in [
            ("without_client", LIST_WITHOUT_CLIENT),
            ("with_client", LIST_WITH_CLIENT),
        ] {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let client = setup();
            group.bench_with_input(BenchmarkId::new(name, item_count), &data, |b, data| {
                b.to_async(&runtime)
                    .iter(|| fetch_and_read(&client, query, data));
            });
        }
    }
    group.finish();
}

fn client_field_at_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_field_at_root");
    for item_count in ITEM_COUNTS {
        let data = root_response(item_count);
        for (name, query) in [
            ("without_client", ROOT_WITHOUT_CLIENT),
            ("with_client", ROOT_WITH_CLIENT),
        ] {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let client = setup();
            group.bench_with_input(BenchmarkId::new(name, item_count), &data, |b, data| {
                b.to_async(&runtime)
                    .iter(|| fetch_and_read(&client, query, data));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, client_field_in_list, client_field_at_root);
criterion_main!(benches);
