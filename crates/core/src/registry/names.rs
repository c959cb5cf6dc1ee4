//! Variable name hashing, normalization and key composition

/// 32-bit FNV-1 hash of a variable name
///
/// Stable across runs and platforms; tables and binding scans compare it
/// before comparing strings.
pub fn simple_hash(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5_u32, |hash, byte| hash.wrapping_mul(16_777_619) ^ u32::from(byte))
}

/// Normalize a user-supplied name into the registry charset
///
/// ASCII letters are lowercased, digits, `.` and `_` are kept, and every other
/// character becomes `_`. Two spellings that differ only in case or
/// punctuation therefore name the same variable.
pub fn fix_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

/// Build `<prefix>.<variable>`, clamped to `max_len` bytes
pub fn compose_key(prefix: &str, variable: &str, max_len: usize) -> String {
    let mut key = String::with_capacity(prefix.len() + variable.len() + 1);
    key.push_str(prefix);
    key.push('.');
    key.push_str(variable);
    truncate_key(key, max_len)
}

/// Clamp `key` to `max_len` bytes at a character boundary
pub fn truncate_key(mut key: String, max_len: usize) -> String {
    if key.len() > max_len {
        let mut end = max_len;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        key.truncate(end);
    }
    key
}
