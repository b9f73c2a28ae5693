#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    clippy::cast_precision_loss,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use safelate::{Driver, SafelateEngine, SafelateInterface, Template, ValueProvider};

mod utils;

fn safelate_benchmark(c: &mut Criterion) {
    let template_content = include_str!("profile.safelate");

    let mut engine = SafelateEngine::new();
    engine.add_template("profile", template_content).unwrap();

    let views = utils::generate_random_views(100);

    utils::print_binary_size();

    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);

    group.bench_function("safelate_parse", |b| {
        b.iter(|| black_box(Template::parse(template_content, "profile").unwrap()));
    });

    group.bench_function("safelate_render", |b| {
        b.iter(|| {
            for view in &views {
                black_box(engine.render("profile", &ValueProvider, view.clone()).unwrap());
            }
        });
    });

    // Skips the engine's name lookup and included template setup.
    let template = engine.get("profile").unwrap();
    group.bench_function("safelate_render_template", |b| {
        b.iter(|| {
            for view in &views {
                let mut driver = Driver::new(&ValueProvider, view.clone());
                black_box(template.render(&mut driver).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, safelate_benchmark);
criterion_main!(benches);
