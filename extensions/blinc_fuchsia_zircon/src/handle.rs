//! Generic handle wrapper for Zircon kernel objects

use crate::{sys, RawHandle, Rights, Signals, Status, Time, HANDLE_INVALID};

/// Kernel object id
pub type Koid = u64;

/// Kernel object type (`zx_obj_type_t`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjectType {
    /// Unknown or unchecked type
    #[default]
    None = 0,
    Process = 1,
    Thread = 2,
    Vmo = 3,
    Channel = 4,
    Event = 5,
    Port = 6,
    Socket = 14,
    EventPair = 16,
    Job = 17,
    Vmar = 18,
}

impl ObjectType {
    /// Get the raw `zx_obj_type_t` value
    pub fn into_raw(self) -> u32 {
        self as u32
    }
}

/// Result of `ZX_INFO_HANDLE_BASIC`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleBasicInfo {
    /// Object id
    pub koid: Koid,
    /// Rights carried by this handle
    pub rights: Rights,
    /// Object type
    pub object_type: ObjectType,
    /// Koid of the peer object (0 if none)
    pub related_koid: Koid,
}

/// A borrowed reference to a handle
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct HandleRef<'a> {
    raw: RawHandle,
    _phantom: std::marker::PhantomData<&'a Handle>,
}

impl<'a> HandleRef<'a> {
    /// Create a HandleRef from a raw handle
    ///
    /// # Safety
    /// The handle must be valid for the lifetime 'a
    pub unsafe fn from_raw(raw: RawHandle) -> Self {
        HandleRef {
            raw,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Get the raw handle value
    pub fn raw_handle(&self) -> RawHandle {
        self.raw
    }
}

/// Trait for types that can be converted to a HandleRef
pub trait AsHandleRef {
    /// Get a reference to the underlying handle
    fn as_handle_ref(&self) -> HandleRef<'_>;

    /// Get the raw handle value
    fn raw_handle(&self) -> RawHandle {
        self.as_handle_ref().raw_handle()
    }

    /// Check if this handle is valid
    fn is_invalid(&self) -> bool {
        self.raw_handle() == HANDLE_INVALID
    }

    /// Query `ZX_INFO_HANDLE_BASIC`
    fn basic_info(&self) -> crate::Result<HandleBasicInfo> {
        sys::object_get_basic_info(self.raw_handle())
    }

    /// Kernel object id of the referenced object
    fn koid(&self) -> crate::Result<Koid> {
        self.basic_info().map(|info| info.koid)
    }

    /// Number of open handles referring to the same object
    fn handle_count(&self) -> crate::Result<u32> {
        sys::object_handle_count(self.raw_handle())
    }

    /// Block until any of `signals` is asserted or `deadline` passes
    fn wait_one(&self, signals: Signals, deadline: Time) -> crate::Result<Signals> {
        sys::object_wait_one(self.raw_handle(), signals, deadline)
    }

    /// Register a one-shot observer for `signals`
    ///
    /// `callback` runs exactly once: with the observed signals when any of
    /// `signals` becomes asserted (immediately, on the calling thread, if it
    /// already is), or with `ERR_CANCELED` if this handle is closed first.
    /// It does not run if the observer is removed with [`cancel_wait`].
    ///
    /// [`cancel_wait`]: AsHandleRef::cancel_wait
    fn wait_async(&self, signals: Signals, key: u64, callback: WaitCallback) -> crate::Result<()> {
        sys::object_wait_async(self.raw_handle(), signals, key, callback)
    }

    /// Remove an observer registered with `key`
    ///
    /// Returns `ERR_NOT_FOUND` if it already fired.
    fn cancel_wait(&self, key: u64) -> crate::Result<()> {
        sys::object_wait_cancel(self.raw_handle(), key)
    }

    /// Clear and set user signals on this object
    fn signal(&self, clear: Signals, set: Signals) -> crate::Result<()> {
        sys::object_signal(self.raw_handle(), clear, set, false)
    }
}

/// Callback for [`AsHandleRef::wait_async`]
pub type WaitCallback = Box<dyn FnOnce(crate::Result<Signals>) + Send>;

/// Trait for types backed by a Zircon handle
pub trait HandleBased: AsHandleRef + From<Handle> + Into<Handle> {
    /// Create an instance from a raw handle
    ///
    /// # Safety
    /// The caller must own the handle; it will be closed when the instance drops
    unsafe fn from_raw(raw: RawHandle) -> Self {
        Handle::from_raw(raw).into()
    }

    /// Convert into a raw handle, consuming self
    fn into_raw(self) -> RawHandle {
        let handle: Handle = self.into();
        handle.into_raw()
    }

    /// Convert into a generic handle
    fn into_handle(self) -> Handle {
        self.into()
    }

    /// Duplicate with the given rights
    fn duplicate_handle(&self, rights: Rights) -> crate::Result<Self> {
        sys::handle_duplicate(self.raw_handle(), rights).map(Self::from)
    }
}

/// A generic handle to a Zircon kernel object
///
/// When dropped, the handle is automatically closed.
#[derive(Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(RawHandle);

impl Handle {
    /// Create a Handle from a raw handle value
    ///
    /// # Safety
    /// The caller must own the handle; it will be closed on drop
    pub unsafe fn from_raw(raw: RawHandle) -> Self {
        Handle(raw)
    }

    /// Get the raw handle value without consuming self
    pub fn raw_handle(&self) -> RawHandle {
        self.0
    }

    /// Convert into a raw handle, consuming self without closing
    pub fn into_raw(self) -> RawHandle {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    /// Check if this is an invalid handle
    pub fn is_invalid(&self) -> bool {
        self.0 == HANDLE_INVALID
    }

    /// Replace this handle with an invalid handle, returning the old value
    pub fn take(&mut self) -> Handle {
        let raw = self.0;
        self.0 = HANDLE_INVALID;
        Handle(raw)
    }

    /// Create an invalid handle
    pub const fn invalid() -> Self {
        Handle(HANDLE_INVALID)
    }

    /// Duplicate this handle with the given rights
    pub fn duplicate(&self, rights: Rights) -> crate::Result<Handle> {
        if self.is_invalid() {
            return Err(Status::ERR_BAD_HANDLE);
        }
        sys::handle_duplicate(self.0, rights)
    }

    /// Replace this handle with one that has reduced rights
    pub fn replace(self, rights: Rights) -> crate::Result<Handle> {
        if self.is_invalid() {
            return Err(Status::ERR_BAD_HANDLE);
        }
        let raw = self.into_raw();
        sys::handle_replace(raw, rights)
    }
}

impl AsHandleRef for Handle {
    fn as_handle_ref(&self) -> HandleRef<'_> {
        HandleRef {
            raw: self.0,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.is_invalid() {
            sys::handle_close(self.0);
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::invalid()
    }
}

// Handle intentionally does not implement Clone.
// Use duplicate() to create a copy with explicit rights.
