//! COM object model shared by the Direct3D backends.
//!
//! The layer hands the application proxy objects instead of the driver's
//! objects. A proxy keeps two reference counts in step:
//!
//! * its own count, which is what the application observes, and
//! * one native reference per application reference, forwarded to the
//!   wrapped object on every `add_ref`/`release`.
//!
//! When the proxy count reaches zero, [`release_proxy`] runs the destruction
//! sequence in a fixed order:
//!
//! 1. release owned children (implicit swap chains, immediate contexts),
//! 2. tear down the proxy (destroy events, registry cleanup),
//! 3. release the native reference the proxy held,
//! 4. compare the native count the driver reports with the expected residual
//!    and warn on a mismatch.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lumen_core::ApiError;

/// Native `HRESULT`.
pub type HResult = i32;

pub const S_OK: HResult = 0;
pub const S_FALSE: HResult = 1;
pub const E_NOINTERFACE: HResult = 0x8000_4002_u32 as i32;
pub const E_POINTER: HResult = 0x8000_4003_u32 as i32;
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;
pub const E_OUTOFMEMORY: HResult = 0x8007_000E_u32 as i32;
pub const E_INVALIDARG: HResult = 0x8007_0057_u32 as i32;
pub const D3DERR_INVALIDCALL: HResult = 0x8876_086C_u32 as i32;
pub const D3DERR_OUTOFVIDEOMEMORY: HResult = 0x8876_017C_u32 as i32;
pub const D3DERR_DEVICELOST: HResult = 0x8876_0868_u32 as i32;
pub const D3DERR_NOTFOUND: HResult = 0x8876_0866_u32 as i32;
pub const DXGI_ERROR_DEVICE_REMOVED: HResult = 0x887A_0005_u32 as i32;
pub const DXGI_ERROR_INVALID_CALL: HResult = 0x887A_0001_u32 as i32;

pub fn succeeded(hr: HResult) -> bool {
    hr >= 0
}

pub fn failed(hr: HResult) -> bool {
    hr < 0
}

/// Map a failed `HRESULT` to the abstract error add-ons observe.
pub fn hresult_to_api_error(hr: HResult) -> ApiError {
    match hr {
        E_OUTOFMEMORY | D3DERR_OUTOFVIDEOMEMORY => ApiError::OutOfMemory,
        DXGI_ERROR_DEVICE_REMOVED | D3DERR_DEVICELOST => ApiError::DeviceLost,
        E_INVALIDARG | D3DERR_INVALIDCALL | DXGI_ERROR_INVALID_CALL => {
            ApiError::InvalidParameter(format!("HRESULT {:#010x}", hr as u32))
        }
        _ => ApiError::Native(i64::from(hr as u32)),
    }
}

/// Raw COM interface pointer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ComPtr(pub u64);

impl ComPtr {
    pub const NULL: ComPtr = ComPtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Interface identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub u128);

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self(
            (data1 as u128) << 96
                | (data2 as u128) << 80
                | (data3 as u128) << 64
                | u64::from_be_bytes(data4) as u128,
        )
    }
}

pub const IID_IUNKNOWN: Guid =
    Guid::new(0x0000_0000, 0x0000, 0x0000, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]);

/// Trampolines every native COM object supports.
pub trait ComDriver: Send + Sync {
    /// `IUnknown::AddRef`, returning the new native count.
    fn add_ref(&self, object: ComPtr) -> u32;
    /// `IUnknown::Release`, returning the remaining native count.
    fn release(&self, object: ComPtr) -> u32;
    /// `IUnknown::QueryInterface`. A returned pointer carries one reference.
    fn query_interface(&self, object: ComPtr, iid: &Guid) -> Result<ComPtr, HResult>;
}

/// Result of querying a proxy for an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queried {
    /// The proxy itself implements the interface; its count was incremented.
    Proxy,
    /// Interface the layer does not wrap; the native pointer is passed
    /// through with the reference the driver added.
    Native(ComPtr),
}

/// `IUnknown` as implemented by proxies.
pub trait Unknown {
    fn query_interface(&self, iid: &Guid) -> Result<Queried, HResult>;
    fn add_ref(&self) -> u32;
    fn release(&self) -> u32;
}

/// Outcome of a proxy release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRelease {
    /// The proxy is still referenced `n` times.
    Alive(u32),
    /// The last reference went away; the proxy must be destroyed now.
    Final,
}

/// Application-visible reference count of a proxy.
#[derive(Debug)]
pub struct ProxyRefCount {
    count: AtomicU32,
    destroyed: AtomicBool,
}

impl Default for ProxyRefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyRefCount {
    /// A fresh count of one, owned by the creating call.
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn add_ref(&self) -> u32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release(&self) -> ProxyRelease {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        match previous {
            Ok(1) => {
                let already = self.destroyed.swap(true, Ordering::AcqRel);
                debug_assert!(!already, "proxy destroyed twice");
                ProxyRelease::Final
            }
            Ok(count) => ProxyRelease::Alive(count - 1),
            Err(_) => {
                log::error!("release of a proxy whose reference count is already zero");
                debug_assert!(false, "proxy released too often");
                ProxyRelease::Alive(0)
            }
        }
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Release one application reference of a proxy.
///
/// `teardown` runs only on the final release, before the native reference is
/// dropped; it releases owned children first and then unregisters the proxy.
/// `expected_residual` is the native count that must remain afterwards
/// (references the driver keeps internally, such as a device's reference
/// from its implicit swap chain).
pub fn release_proxy<D: ComDriver + ?Sized>(
    refs: &ProxyRefCount,
    driver: &D,
    native: ComPtr,
    interface_name: &str,
    expected_residual: u32,
    teardown: impl FnOnce(),
) -> u32 {
    match refs.release() {
        ProxyRelease::Alive(remaining) => {
            driver.release(native);
            remaining
        }
        ProxyRelease::Final => {
            teardown();
            let residual = driver.release(native);
            if residual != expected_residual {
                log::warn!(
                    "Reference count for {} object {:#x} is inconsistent ({}).",
                    interface_name,
                    native.raw(),
                    residual
                );
            } else {
                log::debug!("destroyed {} proxy {:#x}", interface_name, native.raw());
            }
            0
        }
    }
}

/// Increment both counts of a proxy.
pub fn add_ref_proxy<D: ComDriver + ?Sized>(refs: &ProxyRefCount, driver: &D, native: ComPtr) -> u32 {
    driver.add_ref(native);
    refs.add_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Counts(Mutex<HashMap<u64, u32>>);

    impl ComDriver for Counts {
        fn add_ref(&self, object: ComPtr) -> u32 {
            let mut counts = self.0.lock();
            let count = counts.entry(object.raw()).or_insert(0);
            *count += 1;
            *count
        }

        fn release(&self, object: ComPtr) -> u32 {
            let mut counts = self.0.lock();
            let count = counts.entry(object.raw()).or_insert(1);
            *count -= 1;
            *count
        }

        fn query_interface(&self, _: ComPtr, _: &Guid) -> Result<ComPtr, HResult> {
            Err(E_NOINTERFACE)
        }
    }

    #[test]
    fn test_guid_layout() {
        assert_eq!(IID_IUNKNOWN.0, 0x0000_0000_0000_0000_C000_0000_0000_0046);
    }

    #[test]
    fn test_hresult_classification() {
        assert!(succeeded(S_FALSE));
        assert!(failed(E_FAIL));
        assert_eq!(hresult_to_api_error(E_OUTOFMEMORY), ApiError::OutOfMemory);
        assert_eq!(
            hresult_to_api_error(DXGI_ERROR_DEVICE_REMOVED),
            ApiError::DeviceLost
        );
        assert_eq!(hresult_to_api_error(E_FAIL), ApiError::Native(0x8000_4005));
    }

    #[test]
    fn test_dual_counts_stay_in_step() {
        let driver = Counts::default();
        let native = ComPtr(0x100);
        driver.add_ref(native);
        let refs = ProxyRefCount::new();

        assert_eq!(add_ref_proxy(&refs, &driver, native), 2);
        assert_eq!(driver.0.lock()[&0x100], 2);

        let mut torn_down = 0;
        assert_eq!(release_proxy(&refs, &driver, native, "IUnknown", 0, || torn_down += 1), 1);
        assert_eq!(torn_down, 0);
        assert_eq!(release_proxy(&refs, &driver, native, "IUnknown", 0, || torn_down += 1), 0);
        assert_eq!(torn_down, 1);
        assert!(refs.is_destroyed());
        assert_eq!(driver.0.lock()[&0x100], 0);
    }

    #[test]
    fn test_teardown_runs_before_native_release() {
        let driver = Counts::default();
        let native = ComPtr(0x200);
        driver.add_ref(native);
        let refs = ProxyRefCount::new();
        let mut seen = None;
        release_proxy(&refs, &driver, native, "IUnknown", 0, || {
            seen = Some(driver.0.lock()[&0x200]);
        });
        assert_eq!(seen, Some(1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released too often")]
    fn test_over_release_asserts() {
        let refs = ProxyRefCount::new();
        assert_eq!(refs.release(), ProxyRelease::Final);
        refs.release();
    }
}
