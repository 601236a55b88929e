use super::error::{SaveError, SaveResult};

/// Max length of a single save name segment
pub const MAX_SEGMENT_LEN: usize = 64;

/// Max number of nested segments in a save name
pub const MAX_SEGMENTS: usize = 8;

/// Max length of an inner file name
pub const MAX_FILE_NAME_LEN: usize = 128;

#[inline]
fn invalid(name: &str, reason: &'static str) -> SaveError {
    SaveError::InvalidName {
        name: name.to_string(),
        reason,
    }
}

/// Validates a save name like `slot-1` or `profile/slot-1`.
///
/// Segments only allow lowercase ascii letters, digits, `-` and `_`. Keeping
/// the set lowercase and dot-free means two different names never land on the
/// same location, even on case-insensitive file systems or when a backend
/// appends an extension to the last segment.
pub fn validate_save_name(name: &str) -> SaveResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "empty name"));
    }

    let mut count = 0;
    for segment in name.split('/') {
        count += 1;
        if count > MAX_SEGMENTS {
            return Err(invalid(name, "too many segments"));
        }

        if segment.is_empty() {
            return Err(invalid(name, "empty segment"));
        }

        if segment == "." || segment == ".." {
            return Err(invalid(name, "relative segment"));
        }

        if segment.len() > MAX_SEGMENT_LEN {
            return Err(invalid(name, "segment too long"));
        }

        let valid_chars = segment
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_'));
        if !valid_chars {
            return Err(invalid(name, "disallowed character"));
        }
    }

    Ok(())
}

/// Validates the name of a file inside an archive.
///
/// Inner names are flat keys, ascii letters, digits, `-`, `_` and `.` are allowed.
pub fn validate_file_name(name: &str) -> SaveResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "empty name"));
    }

    if name == "." || name == ".." {
        return Err(invalid(name, "relative name"));
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(invalid(name, "name too long"));
    }

    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !valid_chars {
        return Err(invalid(name, "disallowed character"));
    }

    Ok(())
}
