//! Per-API device virtualization.
//!
//! Each backend wraps the native device of one graphics API in an
//! implementation of [`DeviceApi`](lumen_core::DeviceApi), tracks the
//! objects the application creates, and exposes the intercepted entry
//! points as free functions in its `hooks` module.
//!
//! # Available Backends
//!
//! - `vulkan-backend`: Vulkan, through the layer dispatch chain (ash)
//! - `opengl-backend`: OpenGL share groups and contexts
//! - `d3d9-backend`: Direct3D 9
//! - `d3d11-backend`: Direct3D 10 and 11
//! - `d3d12-backend`: Direct3D 12
//!
//! With the `dummy` feature every backend also ships an in-memory driver
//! that keeps books instead of talking to a GPU.

#[cfg(any(feature = "d3d9-backend", feature = "d3d11-backend", feature = "d3d12-backend"))]
pub mod com;

#[cfg(any(feature = "d3d11-backend", feature = "d3d12-backend"))]
pub mod dxgi;

#[cfg(any(feature = "d3d11-backend", feature = "d3d12-backend"))]
pub mod d3d_state;

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

#[cfg(feature = "opengl-backend")]
pub mod opengl;

#[cfg(feature = "d3d9-backend")]
pub mod d3d9;

#[cfg(feature = "d3d11-backend")]
pub mod d3d11;

#[cfg(feature = "d3d12-backend")]
pub mod d3d12;
