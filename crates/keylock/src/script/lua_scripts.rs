//! Lua scripts for owner-checked lock operations.
//!
//! Each script reads the value stored under the lock name and only acts when
//! it equals the caller's owner token. Redis runs a script as one unit, so no
//! other client can acquire the name between the read and the write.
//!
//! # Safety Properties
//!
//! - A holder whose lease expired cannot delete or extend the next holder's lock
//! - Missing keys compare unequal (`GET` yields `false` in Lua)
//! - Scripts only touch `KEYS[1]`, so they are safe under cluster key routing

/// Lua script for compare-and-delete (release).
///
/// Arguments:
/// - KEYS[1]: Lock name
/// - ARGV[1]: Owner token
///
/// Returns:
/// - 1: Deleted (caller was the holder)
/// - 0: Not the holder (expired, reassigned, or never acquired)
pub const COMPARE_AND_DELETE: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Lua script for compare-and-extend (lease renewal).
///
/// Arguments:
/// - KEYS[1]: Lock name
/// - ARGV[1]: Owner token
/// - ARGV[2]: New lease in milliseconds
///
/// Returns:
/// - 1: Lease reset (caller was the holder)
/// - 0: Not the holder
pub const COMPARE_AND_EXTEND: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_compare_before_acting() {
        for script in [COMPARE_AND_DELETE, COMPARE_AND_EXTEND] {
            assert!(script.contains("redis.call('GET', KEYS[1])"));
            assert!(script.contains("if current == ARGV[1] then"));
            assert!(script.contains("return 0"));
        }
    }

    #[test]
    fn test_compare_and_delete_returns_delete_count() {
        assert!(COMPARE_AND_DELETE.contains("return redis.call('DEL', KEYS[1])"));
        assert!(!COMPARE_AND_DELETE.contains("PEXPIRE"));
    }

    #[test]
    fn test_compare_and_extend_uses_millisecond_expiry() {
        // PEXPIRE, not EXPIRE: leases are passed in milliseconds
        assert!(COMPARE_AND_EXTEND.contains("redis.call('PEXPIRE', KEYS[1], ARGV[2])"));
        assert!(!COMPARE_AND_EXTEND.contains("DEL"));
    }

    #[test]
    fn test_scripts_only_touch_first_key() {
        for script in [COMPARE_AND_DELETE, COMPARE_AND_EXTEND] {
            assert!(!script.contains("KEYS[2]"));
        }
    }
}
