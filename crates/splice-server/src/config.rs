//! Runtime configuration assembled from the command line.

/// Settings the handlers and background tasks read at runtime.
#[derive(Debug, Clone)]
pub struct ServerSection {
    pub listen: String,
    pub staging_dir: String,
    /// Concurrent chunk copies per merge.
    pub merge_parallelism: usize,
    /// Largest accepted chunk body in bytes. 0 disables the cap.
    pub max_chunk_bytes: u64,
    /// Age after which an orphaned temp file is swept.
    pub temp_max_age_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8686".to_string(),
            staging_dir: "/var/lib/splice/chunks".to_string(),
            merge_parallelism: 8,
            max_chunk_bytes: 256 * 1024 * 1024,
            temp_max_age_seconds: 3600,
        }
    }
}

/// Parse a byte size with an optional K/M/G suffix (powers of 1024).
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let (digits, multiplier) = match trimmed.as_bytes().last() {
        Some(b'K') | Some(b'k') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some(b'M') | Some(b'm') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some(b'G') | Some(b'g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{input}'"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{input}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_plain_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("1048576").unwrap(), 1048576);
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("2g").unwrap(), parse_size("2G").unwrap());
        assert_eq!(parse_size(" 8 K ").unwrap(), 8192);
    }

    #[test]
    fn parse_size_rejects_junk() {
        assert!(parse_size("").is_err());
        assert!(parse_size("K").is_err());
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn parse_size_rejects_overflow() {
        assert!(parse_size("18446744073709551615G").is_err());
    }
}
