//! Handle slots and outgoing handle dispositions

use blinc_fuchsia_zircon::{AsHandleRef, Handle, Rights};

pub use blinc_fuchsia_zircon::ObjectType;

use crate::{Error, Result};

/// Wire value of a present handle slot
pub const HANDLE_PRESENT: u32 = u32::MAX;

/// Wire value of an absent handle slot
pub const HANDLE_ABSENT: u32 = 0;

/// An outgoing handle plus the type and rights its slot declares
///
/// Mirrors `zx_handle_disposition_t`: before the message is written the
/// handle is checked against `object_type` and reduced to `rights`.
#[derive(Debug)]
pub struct HandleDisposition {
    /// The handle
    pub handle: Handle,
    /// Expected object type (`None` skips the check)
    pub object_type: ObjectType,
    /// Rights the receiver gets (`SAME_RIGHTS` keeps them)
    pub rights: Rights,
}

impl HandleDisposition {
    /// Move a handle without checks
    pub fn move_handle(handle: Handle) -> Self {
        Self {
            handle,
            object_type: ObjectType::None,
            rights: Rights::SAME_RIGHTS,
        }
    }

    /// Move a handle, checking its type and reducing its rights
    pub fn new(handle: Handle, object_type: ObjectType, rights: Rights) -> Self {
        Self {
            handle,
            object_type,
            rights,
        }
    }

    /// Resolve into the handle that goes on the wire
    ///
    /// On error the handle is closed.
    pub fn into_transfer(self) -> Result<Handle> {
        check_handle(self.handle, self.object_type, self.rights)
    }
}

/// Verify a handle's object type and narrow it to `rights`
///
/// `ObjectType::None` and `Rights::SAME_RIGHTS` skip the respective check.
/// A handle carrying more rights than required is replaced by one carrying
/// exactly `rights`; one carrying fewer is rejected. The handle is closed on
/// any error.
pub(crate) fn check_handle(handle: Handle, object_type: ObjectType, rights: Rights) -> Result<Handle> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }
    if object_type == ObjectType::None && rights == Rights::SAME_RIGHTS {
        return Ok(handle);
    }

    let info = handle.basic_info()?;
    if object_type != ObjectType::None && info.object_type != object_type {
        return Err(Error::IncorrectHandleType {
            expected: object_type,
            actual: info.object_type,
        });
    }
    if rights == Rights::SAME_RIGHTS || info.rights == rights {
        return Ok(handle);
    }
    if !info.rights.contains(rights) {
        return Err(Error::MissingRights {
            required: rights,
            actual: info.rights,
        });
    }
    Ok(handle.replace(rights)?)
}
