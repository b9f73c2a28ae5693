use rand::{Rng, SeedableRng, rngs::StdRng};
use safelate::Value;

/// Generate n random views to use in the benchmark
pub fn generate_random_views(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut views = Vec::with_capacity(n);

    for _ in 0..n {
        let name = random_string(&mut rng, 5, 10);
        let age: u32 = rng.random_range(18..80);
        let is_active = rng.random_bool(0.7);

        let items_count = rng.random_range(3..10);
        let mut items = Vec::with_capacity(items_count);
        for _ in 0..items_count {
            let item_name = random_string(&mut rng, 3, 8);
            let item_value: u32 = rng.random_range(10..1000);
            items.push(Value::object([
                ("name", Value::from(item_name)),
                ("value", Value::from(item_value)),
                ("special", Value::from(rng.random_bool(0.3))),
            ]));
        }

        views.push(Value::object([
            (
                "user",
                Value::object([
                    ("name", Value::from(name)),
                    ("age", Value::from(age)),
                    ("active", Value::from(is_active)),
                ]),
            ),
            ("items", Value::Array(items)),
            ("show_details", Value::from(rng.random_bool(0.8))),
            ("has_access", Value::from(rng.random_bool(0.6))),
        ]));
    }

    views
}

/// A lowercase ASCII word between `min_len` and `max_len` characters long.
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

/// Reports the size of the bench binary, as a rough guide to code size.
pub fn print_binary_size() {
    let Ok(binary_path) = std::env::current_exe() else {
        return;
    };
    let Ok(metadata) = std::fs::metadata(&binary_path) else {
        return;
    };
    let size_kb = metadata.len() as f64 / 1024.0;
    println!(
        "{}: {:.1} KB ({:.2} MB)",
        binary_path.display(),
        size_kb,
        size_kb / 1024.0
    );
}
