use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use lumen_core::{Addon, CommandList, DeviceApi, Format, LayerConfig};
use lumen_graphics::backend::com::ComPtr;
use lumen_graphics::backend::d3d11::conversion::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
};
use lumen_graphics::backend::d3d11::dummy::DummyD3D11;
use lumen_graphics::backend::d3d11::{hooks, D3D11Driver, TextureDesc, ViewKind};
use lumen_graphics::{Directory, LayerService};

// ---------------------------------------------------------------------------
// Object directory
// ---------------------------------------------------------------------------

fn bench_directory_lookup_hit(c: &mut Criterion) {
    let directory = Directory::<u64>::new("object");
    for handle in 1..=10_000u64 {
        directory.insert(handle, Arc::new(handle));
    }
    c.bench_function("directory_lookup_hit_10k", |b| {
        let mut handle = 0u64;
        b.iter(|| {
            handle = handle % 10_000 + 1;
            black_box(directory.get(black_box(handle)));
        });
    });
}

fn bench_directory_insert_remove(c: &mut Criterion) {
    let directory = Directory::<u64>::new("object");
    let wrapper = Arc::new(0u64);
    c.bench_function("directory_insert_remove", |b| {
        let mut handle = 0u64;
        b.iter(|| {
            handle += 1;
            directory.insert(black_box(handle), Arc::clone(&wrapper));
            black_box(directory.remove(handle));
        });
    });
}

// ---------------------------------------------------------------------------
// Intercepted draw path
// ---------------------------------------------------------------------------

struct DrawCounter;

impl Addon for DrawCounter {
    fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, vertices: u32, _: u32, _: u32, _: u32) -> bool {
        black_box(vertices);
        false
    }
}

/// A D3D11 device with one render target bound on the immediate context.
fn d3d11_setup(with_addon: bool) -> (LayerService, ComPtr, ComPtr) {
    let service = LayerService::new(LayerConfig::default());
    if with_addon {
        service.addons().register(Arc::new(DrawCounter));
    }
    let dummy = Arc::new(DummyD3D11::new(640, 480));
    let device = dummy.device();
    let context = dummy.immediate_context();
    hooks::create_device(&service, dummy).unwrap();

    let desc = TextureDesc {
        width: 64,
        height: 64,
        format: Format::R8G8B8A8Unorm.raw(),
        bind_flags: D3D11_BIND_RENDER_TARGET | D3D11_BIND_SHADER_RESOURCE,
        ..Default::default()
    };
    let texture = hooks::create_texture(&service, device, &desc, None).unwrap();
    let rtv = hooks::create_view(&service, device, ViewKind::RenderTarget, texture, None).unwrap();
    hooks::om_set_render_targets(&service, context, &[rtv], ComPtr::NULL);
    (service, device, context)
}

fn bench_d3d11_draw_no_addons(c: &mut Criterion) {
    let (service, _device, context) = d3d11_setup(false);
    c.bench_function("d3d11_draw_no_addons", |b| {
        b.iter(|| hooks::draw(&service, context, black_box(3), 0));
    });
}

fn bench_d3d11_draw_with_addon(c: &mut Criterion) {
    let (service, _device, context) = d3d11_setup(true);
    c.bench_function("d3d11_draw_with_addon", |b| {
        b.iter(|| hooks::draw(&service, context, black_box(3), 0));
    });
}

fn bench_d3d11_rebind_render_targets(c: &mut Criterion) {
    let (service, device, context) = d3d11_setup(true);
    let desc = TextureDesc {
        width: 64,
        height: 64,
        format: Format::R8G8B8A8Unorm.raw(),
        bind_flags: D3D11_BIND_RENDER_TARGET,
        ..Default::default()
    };
    let views: Vec<ComPtr> = (0..2)
        .map(|_| {
            let texture = hooks::create_texture(&service, device, &desc, None).unwrap();
            hooks::create_view(&service, device, ViewKind::RenderTarget, texture, None).unwrap()
        })
        .collect();
    c.bench_function("d3d11_alternate_render_targets", |b| {
        let mut index = 0;
        b.iter(|| {
            index ^= 1;
            hooks::om_set_render_targets(&service, context, &views[index..=index], ComPtr::NULL);
        });
    });
}

criterion_group!(
    directory_benches,
    bench_directory_lookup_hit,
    bench_directory_insert_remove,
);

criterion_group!(
    hook_benches,
    bench_d3d11_draw_no_addons,
    bench_d3d11_draw_with_addon,
    bench_d3d11_rebind_render_targets,
);

criterion_main!(directory_benches, hook_benches);
