//! Common utilities for the backend integration tests.
//!
//! Every backend is driven through its creation hook with the in-memory
//! driver behind it, so the same scenario runs against all of them.

use std::sync::Arc;

use parking_lot::Mutex;

use lumen_core::{Addon, DeviceApi, GraphicsApi, LayerConfig};
use lumen_graphics::backend::com::ComPtr;
use lumen_graphics::backend::d3d11::dummy::DummyD3D11;
use lumen_graphics::backend::d3d11::D3D11Driver;
use lumen_graphics::backend::d3d12::dummy::DummyD3D12;
use lumen_graphics::backend::d3d12::D3D12Driver;
use lumen_graphics::backend::d3d9::conversion::{D3DFMT_D24S8, D3DFMT_X8R8G8B8};
use lumen_graphics::backend::d3d9::dummy::DummyD3D9;
use lumen_graphics::backend::d3d9::{D3D9Driver, PresentParameters};
use lumen_graphics::backend::dummy::DummyObjects;
use lumen_graphics::backend::opengl::dummy::DummyGl;
use lumen_graphics::backend::opengl::GlDispatch;
use lumen_graphics::backend::vulkan::dummy::DummyVulkan;
use lumen_graphics::backend::vulkan::VulkanDispatch;
use lumen_graphics::backend::{d3d11, d3d12, d3d9, opengl, vulkan};
use lumen_graphics::LayerService;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the scenarios run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Vulkan,
    OpenGl,
    D3D9,
    D3D10,
    D3D11,
    D3D12,
}

impl Backend {
    /// API the device of this backend reports.
    pub fn api(self) -> GraphicsApi {
        match self {
            Backend::Vulkan => GraphicsApi::Vulkan,
            Backend::OpenGl => GraphicsApi::OpenGL,
            Backend::D3D9 => GraphicsApi::D3D9,
            Backend::D3D10 => GraphicsApi::D3D10,
            Backend::D3D11 => GraphicsApi::D3D11,
            Backend::D3D12 => GraphicsApi::D3D12,
        }
    }
}

// ============================================================================
// Recording Add-on
// ============================================================================

/// Add-on that writes down the device lifetime events it sees.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }
}

impl Addon for Recorder {
    fn on_init_device(&self, device: &dyn DeviceApi) {
        self.events.lock().push(format!("init_device:{:?}", device.api()));
    }

    fn on_destroy_device(&self, device: &dyn DeviceApi) {
        self.events.lock().push(format!("destroy_device:{:?}", device.api()));
    }
}

// ============================================================================
// Test Context
// ============================================================================

enum Driver {
    Vulkan(Arc<DummyVulkan>),
    OpenGl(Arc<DummyGl>),
    D3D9(Arc<DummyD3D9>),
    D3D11(Arc<DummyD3D11>),
    D3D12(Arc<DummyD3D12>),
}

/// One layer service with one intercepted device.
pub struct TestContext {
    pub service: LayerService,
    pub recorder: Arc<Recorder>,
    /// The device as add-ons see it.
    pub device: Arc<dyn DeviceApi>,
    driver: Driver,
}

impl TestContext {
    pub fn new(backend: Backend) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let service = LayerService::new(LayerConfig::default());
        let recorder = Arc::new(Recorder::default());
        service.addons().register(recorder.clone());

        let (device, driver): (Arc<dyn DeviceApi>, Driver) = match backend {
            Backend::Vulkan => {
                let dummy = Arc::new(DummyVulkan::new());
                let queue = dummy.queue(0);
                let device: Arc<dyn DeviceApi> =
                    vulkan::hooks::on_device_created(&service, dummy.clone(), &[queue]);
                (device, Driver::Vulkan(dummy))
            }
            Backend::OpenGl => {
                let dummy = Arc::new(DummyGl::new());
                let hglrc = dummy.context();
                let context =
                    opengl::hooks::on_context_created(&service, dummy.clone(), hglrc, hglrc + 1, None);
                opengl::hooks::make_current(&service, hglrc);
                let device: Arc<dyn DeviceApi> = context.device().clone();
                (device, Driver::OpenGl(dummy))
            }
            Backend::D3D9 => {
                let dummy = Arc::new(DummyD3D9::new(&present_parameters()));
                let device: Arc<dyn DeviceApi> = d3d9::hooks::create_device(&service, dummy.clone())
                    .expect("D3D9 device creation");
                (device, Driver::D3D9(dummy))
            }
            Backend::D3D10 | Backend::D3D11 => {
                let dummy = Arc::new(if backend == Backend::D3D10 {
                    DummyD3D11::new_d3d10(WIDTH, HEIGHT)
                } else {
                    DummyD3D11::new(WIDTH, HEIGHT)
                });
                let device: Arc<dyn DeviceApi> = d3d11::hooks::create_device(&service, dummy.clone())
                    .expect("D3D11 device creation");
                (device, Driver::D3D11(dummy))
            }
            Backend::D3D12 => {
                let dummy = Arc::new(DummyD3D12::new(WIDTH, HEIGHT));
                let device: Arc<dyn DeviceApi> = d3d12::hooks::create_device(&service, dummy.clone())
                    .expect("D3D12 device creation");
                (device, Driver::D3D12(dummy))
            }
        };

        Self {
            service,
            recorder,
            device,
            driver,
        }
    }

    /// Native object books of the driver, for failure injection and leak checks.
    pub fn objects(&self) -> &DummyObjects {
        match &self.driver {
            Driver::Vulkan(dummy) => dummy.objects(),
            Driver::OpenGl(dummy) => dummy.objects(),
            Driver::D3D9(dummy) => dummy.objects(),
            Driver::D3D11(dummy) => dummy.objects(),
            Driver::D3D12(dummy) => dummy.objects(),
        }
    }

    /// Run the destruction path the application would trigger.
    pub fn teardown(&self) {
        match &self.driver {
            Driver::Vulkan(dummy) => vulkan::hooks::destroy_device(&self.service, dummy.device()),
            Driver::OpenGl(dummy) => {
                opengl::hooks::on_context_destroyed(&self.service, dummy.context())
            }
            Driver::D3D9(dummy) => {
                release_all(dummy.device(), |ptr| d3d9::hooks::release_device(&self.service, ptr))
            }
            Driver::D3D11(dummy) => {
                release_all(dummy.device(), |ptr| d3d11::hooks::release_device(&self.service, ptr))
            }
            Driver::D3D12(dummy) => {
                release_all(dummy.device(), |ptr| d3d12::hooks::release_device(&self.service, ptr))
            }
        }
    }
}

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

fn present_parameters() -> PresentParameters {
    PresentParameters {
        back_buffer_width: WIDTH,
        back_buffer_height: HEIGHT,
        back_buffer_format: D3DFMT_X8R8G8B8,
        back_buffer_count: 1,
        enable_auto_depth_stencil: true,
        auto_depth_stencil_format: D3DFMT_D24S8,
        ..Default::default()
    }
}

/// Release a proxied device until the last reference is gone.
fn release_all(device: ComPtr, mut release: impl FnMut(ComPtr) -> u32) {
    for _ in 0..8 {
        if release(device) == 0 {
            return;
        }
    }
    panic!("device {:#x} still referenced", device.raw());
}
