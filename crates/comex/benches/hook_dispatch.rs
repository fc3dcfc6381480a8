use comex::{hook_args, DataStore, HookPolicy, HookRegistry};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

fn registry(callbacks: usize) -> HookRegistry<Vec<i64>> {
    let mut registry = HookRegistry::new();
    for idx in 0..callbacks {
        registry.on("filter", HookPolicy::APPEND, move |sink: &mut Vec<i64>, args| {
            let value = args.get("value").and_then(Value::as_i64).unwrap_or(0);
            sink.push(value + idx as i64);
            Ok(json!(value))
        });
    }
    registry
}

fn bench_dispatch(c: &mut Criterion) {
    let registry = registry(16);
    let args = hook_args(json!({ "value": 7 }));
    c.bench_function("hook_dispatch_16", |b| {
        b.iter(|| {
            let mut sink = Vec::with_capacity(16);
            let result = registry
                .invoke(&mut sink, "filter", Value::Null, &args)
                .unwrap_or(Value::Null);
            black_box((result, sink));
        });
    });
    c.bench_function("hook_dispatch_unbound", |b| {
        b.iter(|| {
            let mut sink = Vec::new();
            black_box(registry.invoke(&mut sink, "missing", json!(0), &args).is_ok());
        });
    });
}

fn bench_datastore(c: &mut Criterion) {
    c.bench_function("datastore_nested_set", |b| {
        b.iter(|| {
            let mut store = DataStore::new();
            for epoch in 0..32 {
                let key = format!("metrics/epoch_{epoch}/loss");
                store.set(&key, json!(epoch)).expect("set");
            }
            black_box(store.persisted());
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_datastore);
criterion_main!(benches);
