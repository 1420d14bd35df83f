//! Utility functions for minidfs

use std::time::{SystemTime, UNIX_EPOCH};

/// Reduce a DFS path to its final component.
///
/// Clients may send `/home/user/pajaro.jpg`; the coordinator and data nodes
/// both key the file by `pajaro.jpg`.
pub fn clean_path(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Validate a (cleaned) file name before it is used as a registry key or directory name
pub fn validate_file_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidInput("file name cannot be empty".into()));
    }

    if name == "." || name == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "invalid file name: {}",
            name
        )));
    }

    if name.len() > 255 {
        return Err(crate::Error::InvalidInput(
            "file name too long (max 255 bytes)".into(),
        ));
    }

    if name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(crate::Error::InvalidInput(
            "file name contains invalid characters".into(),
        ));
    }

    Ok(())
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Retry with exponential backoff.
///
/// Only errors for which [`crate::Error::is_retryable`] holds are retried; the
/// last error is returned once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_attempts: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;

    for attempt in 0..max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_attempts - 1 => {
                tracing::warn!(
                    "Attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("pajaro.jpg"), "pajaro.jpg");
        assert_eq!(clean_path("/home/user/pajaro.jpg"), "pajaro.jpg");
        assert_eq!(clean_path("dir/sub/"), "");
        assert_eq!(clean_path("C:\\tmp\\report.txt"), "report.txt");
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("report.txt").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("a/b").is_err());
        assert!(validate_file_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::Rejected("NAK".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicUsize::new(0);
        let result: crate::Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::ConnectionFailed("refused".into())) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result, Err(crate::Error::ConnectionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let result: crate::Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::Duplicate("node".into())) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result, Err(crate::Error::Duplicate(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
