//! Zircon status codes

use std::fmt;

/// A Zircon status code (`zx_status_t`)
///
/// `OK` is zero, every error is negative. Kernel operations return
/// `Result<T, Status>` and never produce `Err(Status::OK)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const ERR_INTERNAL: Status = Status(-1);
    pub const ERR_NOT_SUPPORTED: Status = Status(-2);
    pub const ERR_NO_RESOURCES: Status = Status(-3);
    pub const ERR_NO_MEMORY: Status = Status(-4);
    pub const ERR_INVALID_ARGS: Status = Status(-10);
    pub const ERR_BAD_HANDLE: Status = Status(-11);
    pub const ERR_WRONG_TYPE: Status = Status(-12);
    pub const ERR_OUT_OF_RANGE: Status = Status(-14);
    pub const ERR_BUFFER_TOO_SMALL: Status = Status(-15);
    pub const ERR_BAD_STATE: Status = Status(-20);
    pub const ERR_TIMED_OUT: Status = Status(-21);
    pub const ERR_SHOULD_WAIT: Status = Status(-22);
    pub const ERR_CANCELED: Status = Status(-23);
    pub const ERR_PEER_CLOSED: Status = Status(-24);
    pub const ERR_NOT_FOUND: Status = Status(-25);
    pub const ERR_ALREADY_EXISTS: Status = Status(-26);
    pub const ERR_UNAVAILABLE: Status = Status(-28);
    pub const ERR_ACCESS_DENIED: Status = Status(-30);
    pub const ERR_IO: Status = Status(-40);
    pub const ERR_PROTOCOL_NOT_SUPPORTED: Status = Status(-70);

    /// Create a status from its raw value
    pub const fn from_raw(raw: i32) -> Self {
        Status(raw)
    }

    /// Get the raw `zx_status_t` value
    pub const fn into_raw(self) -> i32 {
        self.0
    }

    /// Convert a raw status into a `Result`
    pub fn ok(raw: i32) -> crate::Result<()> {
        if raw == 0 {
            Ok(())
        } else {
            Err(Status(raw))
        }
    }

    /// Symbolic name of the status, e.g. `ZX_ERR_PEER_CLOSED`
    pub fn name(&self) -> &'static str {
        match *self {
            Status::OK => "ZX_OK",
            Status::ERR_INTERNAL => "ZX_ERR_INTERNAL",
            Status::ERR_NOT_SUPPORTED => "ZX_ERR_NOT_SUPPORTED",
            Status::ERR_NO_RESOURCES => "ZX_ERR_NO_RESOURCES",
            Status::ERR_NO_MEMORY => "ZX_ERR_NO_MEMORY",
            Status::ERR_INVALID_ARGS => "ZX_ERR_INVALID_ARGS",
            Status::ERR_BAD_HANDLE => "ZX_ERR_BAD_HANDLE",
            Status::ERR_WRONG_TYPE => "ZX_ERR_WRONG_TYPE",
            Status::ERR_OUT_OF_RANGE => "ZX_ERR_OUT_OF_RANGE",
            Status::ERR_BUFFER_TOO_SMALL => "ZX_ERR_BUFFER_TOO_SMALL",
            Status::ERR_BAD_STATE => "ZX_ERR_BAD_STATE",
            Status::ERR_TIMED_OUT => "ZX_ERR_TIMED_OUT",
            Status::ERR_SHOULD_WAIT => "ZX_ERR_SHOULD_WAIT",
            Status::ERR_CANCELED => "ZX_ERR_CANCELED",
            Status::ERR_PEER_CLOSED => "ZX_ERR_PEER_CLOSED",
            Status::ERR_NOT_FOUND => "ZX_ERR_NOT_FOUND",
            Status::ERR_ALREADY_EXISTS => "ZX_ERR_ALREADY_EXISTS",
            Status::ERR_UNAVAILABLE => "ZX_ERR_UNAVAILABLE",
            Status::ERR_ACCESS_DENIED => "ZX_ERR_ACCESS_DENIED",
            Status::ERR_IO => "ZX_ERR_IO",
            Status::ERR_PROTOCOL_NOT_SUPPORTED => "ZX_ERR_PROTOCOL_NOT_SUPPORTED",
            _ => "ZX_ERR_UNKNOWN",
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl std::error::Error for Status {}
