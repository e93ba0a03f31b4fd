//! Process exit codes.
//!
//! Verification failures reuse [`ap2_mandate::ViolationKind::exit_code`]:
//! 2 for a missing mandate, 3 for a bad signature, 4 for any other check.

pub const OK: i32 = 0;
/// Malformed input, unreadable file, bad configuration.
pub const INPUT_ERROR: i32 = 1;
/// A mandate carries no proof, or a mandate id is unknown.
pub const UNSIGNED: i32 = 2;
/// A proof names a key that is not trusted.
pub const KEY_NOT_TRUSTED: i32 = 3;
