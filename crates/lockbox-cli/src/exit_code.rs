//! Process exit codes.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
pub const NOT_FOUND: u8 = 2;
pub const AUTH_FAILED: u8 = 3;
pub const SERVER_FAILED: u8 = 4;
