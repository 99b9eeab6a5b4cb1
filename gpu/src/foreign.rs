//! Bridge for COM-style foreign objects.
//!
//! D3D objects handed to or returned from this crate carry their own
//! `IUnknown` reference count. [`ForeignRef`] owns exactly one such reference:
//! cloning calls `AddRef`, dropping calls `Release`.
//!
//! The bridge only depends on the `IUnknown` vtable layout, so it is compiled
//! on every platform and exercised with fake objects off Windows.

use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// COM interface identifier.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// `IID_IUnknown`.
pub const IID_IUNKNOWN: Guid = Guid {
    data1: 0x0000_0000,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
};

/// `S_OK`.
pub const S_OK: i32 = 0;
/// `E_NOINTERFACE`.
pub const E_NOINTERFACE: i32 = 0x8000_4002_u32 as i32;
/// `E_POINTER`.
pub const E_POINTER: i32 = 0x8000_4003_u32 as i32;

/// Leading vtable shared by every COM interface.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface: unsafe extern "system" fn(
        this: *mut c_void,
        iid: *const Guid,
        out: *mut *mut c_void,
    ) -> i32,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
struct IUnknown {
    vtbl: *const IUnknownVtbl,
}

/// Call `AddRef` on a foreign object. Null is a no-op returning zero.
///
/// # Safety
///
/// `ptr` must be null or point to a live object whose first field is an
/// `IUnknown`-compatible vtable pointer.
pub unsafe fn com_add_ref(ptr: *mut c_void) -> u32 {
    if ptr.is_null() {
        return 0;
    }
    // SAFETY: guaranteed by the caller.
    unsafe {
        let object = ptr.cast::<IUnknown>();
        ((*(*object).vtbl).add_ref)(ptr)
    }
}

/// Call `Release` on a foreign object. Null is a no-op returning zero.
///
/// # Safety
///
/// Same as [`com_add_ref`]; additionally the caller must own the reference
/// being released.
pub unsafe fn com_release(ptr: *mut c_void) -> u32 {
    if ptr.is_null() {
        return 0;
    }
    // SAFETY: guaranteed by the caller.
    unsafe {
        let object = ptr.cast::<IUnknown>();
        ((*(*object).vtbl).release)(ptr)
    }
}

/// One owned reference to a COM-style foreign object.
pub struct ForeignRef {
    ptr: NonNull<c_void>,
}

impl ForeignRef {
    /// Adopt a reference the caller already owns. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live `IUnknown`-compatible object, and the
    /// caller transfers one reference to the returned value.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Take a new reference to an object the caller keeps owning.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live `IUnknown`-compatible object.
    pub unsafe fn from_raw_borrowed(ptr: *mut c_void) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        // SAFETY: non-null and live per the caller contract.
        unsafe { com_add_ref(ptr.as_ptr()) };
        Some(Self { ptr })
    }

    /// Adopt a reference from a non-null pointer.
    ///
    /// # Safety
    ///
    /// See [`ForeignRef::from_raw`].
    pub(crate) unsafe fn adopt(ptr: NonNull<c_void>) -> Self {
        Self { ptr }
    }

    /// Get the raw pointer without touching the reference count.
    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Give up ownership of the reference, returning the raw pointer.
    ///
    /// The caller becomes responsible for releasing it.
    pub fn into_raw(self) -> *mut c_void {
        ManuallyDrop::new(self).ptr.as_ptr()
    }
}

impl Clone for ForeignRef {
    fn clone(&self) -> Self {
        // SAFETY: we own a reference, so the object is live.
        unsafe { com_add_ref(self.ptr.as_ptr()) };
        Self { ptr: self.ptr }
    }
}

impl Drop for ForeignRef {
    fn drop(&mut self) {
        // SAFETY: we own exactly one reference.
        unsafe { com_release(self.ptr.as_ptr()) };
    }
}

impl PartialEq for ForeignRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for ForeignRef {}

impl fmt::Debug for ForeignRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ForeignRef").field(&self.ptr).finish()
    }
}

// SAFETY: D3D11 (with multithread protection) and D3D12 objects are
// free-threaded; `ForeignRef` only calls AddRef/Release, which are atomic.
unsafe impl Send for ForeignRef {}
// SAFETY: see above.
unsafe impl Sync for ForeignRef {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::dummy::DummyComObject;

    #[test]
    fn test_null_is_tolerated() {
        unsafe {
            assert_eq!(com_add_ref(std::ptr::null_mut()), 0);
            assert_eq!(com_release(std::ptr::null_mut()), 0);
            assert!(ForeignRef::from_raw(std::ptr::null_mut()).is_none());
            assert!(ForeignRef::from_raw_borrowed(std::ptr::null_mut()).is_none());
        }
    }

    #[test]
    fn test_clone_and_drop_balance() {
        let object = DummyComObject::create("ID3D12Resource", None);
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 1);

        let second = object.clone();
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 2);
        assert_eq!(second, object);

        drop(second);
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 1);
    }

    #[test]
    fn test_into_raw_transfers_reference() {
        let object = DummyComObject::create("ID3D11Device", None);
        let keep = object.clone();
        let raw = object.into_raw();
        assert_eq!(unsafe { DummyComObject::ref_count(&keep) }, 2);

        assert_eq!(unsafe { com_release(raw) }, 1);
        assert_eq!(unsafe { DummyComObject::ref_count(&keep) }, 1);
    }

    #[test]
    fn test_borrowed_takes_a_reference() {
        let object = DummyComObject::create("ID3D11Texture2D", None);
        let borrowed = unsafe { ForeignRef::from_raw_borrowed(object.as_raw()) }.unwrap();
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 2);
        drop(borrowed);
        assert_eq!(unsafe { DummyComObject::ref_count(&object) }, 1);
    }
}
