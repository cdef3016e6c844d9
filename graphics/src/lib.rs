//! # Lumen Graphics
//!
//! Per-backend device virtualization of the Lumen interception layer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`backend`] - one module per graphics API, each with its
//!   [`DeviceApi`](lumen_core::DeviceApi) implementation, format and state
//!   translation, and the intercepted entry points in `hooks`
//! - [`LayerService`] - the process-wide directory from native handles to
//!   the layer's wrappers
//! - [`init`] and [`shutdown`] - the load and unload sequence of the layer
//!
//! ## Example
//!
//! ```ignore
//! use lumen_core::LayerConfig;
//!
//! let service = lumen_graphics::init(LayerConfig::from_env());
//! service.addons().register(my_addon);
//! // ... the injection shim forwards driver calls to the backend hooks ...
//! lumen_graphics::shutdown();
//! ```

pub mod backend;
pub mod error;
pub mod service;

use std::sync::Arc;

pub use error::LayerError;
pub use lumen_core::LayerConfig;
pub use service::{Directory, LayerService};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the logger and the layer service.
///
/// `LUMEN_LOG` overrides the filter of `config`. An already installed
/// logger is kept.
pub fn init(config: LayerConfig) -> Arc<LayerService> {
    let env = env_logger::Env::new().filter_or("LUMEN_LOG", config.log_filter.as_str());
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("logger already installed, keeping it");
    }
    log::info!("Lumen v{} initialized", VERSION);
    LayerService::init(config)
}

/// Remove the layer service. Returns `false` if it was not installed.
pub fn shutdown() -> bool {
    LayerService::shutdown()
}
