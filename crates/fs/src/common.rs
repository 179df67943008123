//! Helpers shared by the per-family specialists.

use crate::FsError;

/// Validate an RFC-4122 UUID (case-insensitively).
pub(crate) fn check_uuid_rfc4122(value: &str) -> Result<(), FsError> {
    let valid = value.is_ascii()
        && uuid::Uuid::parse_str(&value.to_ascii_lowercase()).is_ok();
    if valid {
        Ok(())
    } else {
        Err(FsError::UuidInvalid(
            "Provided UUID is not a valid RFC-4122 UUID.".to_string(),
        ))
    }
}

/// Find the first line starting with `prefix`.
pub(crate) fn line_with_prefix<'a>(output: &'a str, prefix: &str) -> Option<&'a str> {
    output.lines().find(|l| l.starts_with(prefix))
}

/// Find the first line containing `needle`.
pub(crate) fn line_containing<'a>(output: &'a str, needle: &str) -> Option<&'a str> {
    output.lines().find(|l| l.contains(needle))
}

/// Parse an unsigned number at the start of `s` (after whitespace), with a
/// `0x` prefix selecting hexadecimal. Trailing text is ignored, matching the
/// strtoull-style parsing the filesystem tools' output was designed for.
pub(crate) fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    u64::from_str_radix(&digits[..end], radix).ok()
}

/// Parse the number following the first `sep` in `line`.
pub(crate) fn value_after<'a>(line: &'a str, sep: char) -> Option<&'a str> {
    line.split_once(sep).map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_uuid() {
        check_uuid_rfc4122("12345678-1234-1234-1234-123456789abc").unwrap();
        check_uuid_rfc4122("12345678-1234-1234-1234-123456789ABC").unwrap();
        assert!(matches!(
            check_uuid_rfc4122("not-a-uuid"),
            Err(FsError::UuidInvalid(_))
        ));
        assert!(check_uuid_rfc4122("12345678-1234-1234-1234-123456789ab\u{fc}").is_err());
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64(" 4096"), Some(4096));
        assert_eq!(parse_u64("262400, imaxpct=25"), Some(262400));
        assert_eq!(parse_u64("0x1f"), Some(31));
        assert_eq!(parse_u64("  123 (45%)"), Some(123));
        assert_eq!(parse_u64("abc"), None);
        assert_eq!(parse_u64(""), None);
    }

    #[test]
    fn test_line_helpers() {
        let out = "first\nInfo: sector size = 512\nlast";
        assert_eq!(
            line_with_prefix(out, "Info: sector size"),
            Some("Info: sector size = 512")
        );
        assert_eq!(line_containing(out, "size ="), Some("Info: sector size = 512"));
        assert_eq!(
            value_after(line_containing(out, "size =").unwrap(), '=')
                .and_then(parse_u64),
            Some(512)
        );
    }
}
