//! Command, reply and info codes, plus the version strings exchanged during the handshake.

pub const AGNOS_PROTOCOL_VERSION: &str = "AGNOS-1.0";
pub const AGNOS_TOOLCHAIN_VERSION: &str = "1.0.0";

/// First byte of every request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Command {
    Ping = 0,
    Invoke = 1,
    Quit = 2,
    Decref = 3,
    Incref = 4,
    GetInfo = 5,
}

impl TryFrom<i8> for Command {
    type Error = i8;

    fn try_from(code: i8) -> Result<Self, i8> {
        Ok(match code {
            0 => Self::Ping,
            1 => Self::Invoke,
            2 => Self::Quit,
            3 => Self::Decref,
            4 => Self::Incref,
            5 => Self::GetInfo,
            other => return Err(other),
        })
    }
}

/// First byte of every reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ReplyCode {
    Success = 0,
    ProtocolError = 1,
    PackedException = 2,
    GenericException = 3,
}

impl TryFrom<i8> for ReplyCode {
    type Error = i8;

    fn try_from(code: i8) -> Result<Self, i8> {
        Ok(match code {
            0 => Self::Success,
            1 => Self::ProtocolError,
            2 => Self::PackedException,
            3 => Self::GenericException,
            other => return Err(other),
        })
    }
}

/// What a GETINFO request asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InfoCode {
    Meta = 0,
    Service = 1,
    Functions = 2,
    Reflection = 3,
}

impl InfoCode {
    /// Unrecognized codes are answered as [`InfoCode::Meta`].
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Service,
            2 => Self::Functions,
            3 => Self::Reflection,
            _ => Self::Meta,
        }
    }
}
