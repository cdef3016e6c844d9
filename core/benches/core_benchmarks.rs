use criterion::{Criterion, black_box, criterion_group, criterion_main};

use lumen_core::registry::{HandleRegistry, ObjectTable};
use lumen_core::render_pass::{RenderPassAttachments, RenderPassTracker};
use lumen_core::{Format, ResourceDesc, ResourceView, TextureDimension};

// ---------------------------------------------------------------------------
// Handle registry
// ---------------------------------------------------------------------------

fn bench_registry_register_unregister(c: &mut Criterion) {
    let registry = HandleRegistry::new(ObjectTable::<ResourceDesc>::new("resource"));
    let desc = ResourceDesc::texture(TextureDimension::D2, 256, 256, Format::R8G8B8A8Unorm);
    c.bench_function("registry_register_unregister", |b| {
        let mut handle = 0u64;
        b.iter(|| {
            handle += 1;
            let mut table = registry.lock();
            let _ = table.register(black_box(handle), desc);
            black_box(table.unregister(handle));
        });
    });
}

fn bench_registry_lookup_hit(c: &mut Criterion) {
    let registry = HandleRegistry::new(ObjectTable::<u64>::new("view"));
    registry.with(|table| {
        for handle in 1..=10_000u64 {
            let _ = table.register(handle, handle);
        }
    });
    c.bench_function("registry_lookup_hit_10k", |b| {
        let mut handle = 0u64;
        b.iter(|| {
            handle = handle % 10_000 + 1;
            black_box(registry.lock().get(black_box(handle)).copied());
        });
    });
}

// ---------------------------------------------------------------------------
// Render pass tracking
// ---------------------------------------------------------------------------

fn bench_tracker_rebind_same(c: &mut Criterion) {
    let attachments = RenderPassAttachments::new()
        .with_color(0, ResourceView(1))
        .with_depth_stencil(ResourceView(2));
    let mut tracker = RenderPassTracker::new();
    tracker.bind(attachments);
    c.bench_function("tracker_rebind_same", |b| {
        b.iter(|| black_box(tracker.bind(black_box(attachments))));
    });
}

fn bench_tracker_alternate(c: &mut Criterion) {
    let a = RenderPassAttachments::new().with_color(0, ResourceView(1));
    let b_set = RenderPassAttachments::new().with_color(0, ResourceView(2));
    let mut tracker = RenderPassTracker::new();
    c.bench_function("tracker_alternate", |b| {
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            black_box(tracker.bind(if flip { a } else { b_set }))
        });
    });
}

criterion_group!(
    benches,
    bench_registry_register_unregister,
    bench_registry_lookup_hit,
    bench_tracker_rebind_same,
    bench_tracker_alternate,
);
criterion_main!(benches);
