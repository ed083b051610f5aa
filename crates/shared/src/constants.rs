/// Length in bytes of every initialization vector and member salt.
pub const IV_SALT_LENGTH: usize = 16;
/// Maximum length for member names.
pub const MAX_MEMBER_NAME_LENGTH: usize = 75;
/// Maximum length for circle names.
pub const MAX_CIRCLE_NAME_LENGTH: usize = 75;
/// Maximum length for stored record names.
pub const MAX_RECORD_NAME_LENGTH: usize = 256;
/// Minimum accepted password length for member accounts.
pub const MIN_PASSWORD_LENGTH: usize = 8;
