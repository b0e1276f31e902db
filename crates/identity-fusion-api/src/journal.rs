use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Append-only failure log, one file per UTC day: `error-YYYY-MM-DD.log`.
#[derive(Debug, Clone)]
pub struct ErrorJournal {
    dir: PathBuf,
}

impl ErrorJournal {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// # Errors
    /// Returns an error when the date cannot be formatted.
    pub fn path_for(&self, at: OffsetDateTime) -> io::Result<PathBuf> {
        let day = at
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(io::Error::other)?;
        Ok(self.dir.join(format!("error-{day}.log")))
    }

    /// Record `error` with its source chain. A failed write is reported
    /// through `tracing` and never replaces the original error.
    pub fn record(&self, error: &dyn Error, context: &str) {
        if let Err(err) = self.record_at(error, context, OffsetDateTime::now_utc()) {
            tracing::error!(dir = %self.dir.display(), error = %err, "failed to write error journal");
        }
    }

    /// # Errors
    /// Returns an error when the journal directory or file cannot be written.
    pub fn record_at(
        &self,
        error: &dyn Error,
        context: &str,
        at: OffsetDateTime,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(at)?;
        let timestamp = at.format(&Rfc3339).map_err(io::Error::other)?;

        let mut entry = format!("[{timestamp}] ERROR: {error}\n");
        let mut source = error.source();
        while let Some(cause) = source {
            entry.push_str(&format!("Caused by: {cause}\n"));
            source = cause.source();
        }
        entry.push_str(&format!("Context: {context}\n\n"));

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(entry.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity_fusion_core::FusionError;
    use time::macros::datetime;

    fn unique_temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("identity-fusion-journal-{}", ulid::Ulid::new()))
    }

    #[test]
    fn entries_append_to_a_file_per_day() {
        let dir = unique_temp_dir();
        let journal = ErrorJournal::new(&dir);
        let error = FusionError::LookupFailure {
            platform: "github".to_string(),
            reason: "no base_url".to_string(),
        };

        let first = match journal.record_at(&error, "Platform lookup failed: github", datetime!(2026-05-04 08:00:00 UTC)) {
            Ok(path) => path,
            Err(err) => panic!("journal write should succeed: {err}"),
        };
        let second = match journal.record_at(&error, "retry", datetime!(2026-05-04 23:59:59 UTC)) {
            Ok(path) => path,
            Err(err) => panic!("journal write should succeed: {err}"),
        };
        let next_day = match journal.record_at(&error, "later", datetime!(2026-05-05 00:00:01 UTC)) {
            Ok(path) => path,
            Err(err) => panic!("journal write should succeed: {err}"),
        };

        assert_eq!(first, second);
        assert_eq!(first, dir.join("error-2026-05-04.log"));
        assert_eq!(next_day, dir.join("error-2026-05-05.log"));

        let body = match fs::read_to_string(&first) {
            Ok(body) => body,
            Err(err) => panic!("journal should be readable: {err}"),
        };
        assert!(body.starts_with("[2026-05-04T08:00:00Z] ERROR: lookup failed for platform github"));
        assert!(body.contains("Context: Platform lookup failed: github\n\n"));
        assert_eq!(body.matches("ERROR:").count(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn source_chain_is_recorded() {
        let dir = unique_temp_dir();
        let journal = ErrorJournal::new(&dir);
        let inner = io::Error::new(io::ErrorKind::TimedOut, "upstream stalled");
        let outer = WrappedError(inner);

        let path = match journal.record_at(&outer, "delivery", datetime!(2026-05-04 08:00:00 UTC)) {
            Ok(path) => path,
            Err(err) => panic!("journal write should succeed: {err}"),
        };
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) => panic!("journal should be readable: {err}"),
        };
        assert!(body.contains("Caused by: upstream stalled"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[derive(Debug)]
    struct WrappedError(io::Error);

    impl std::fmt::Display for WrappedError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "wrapped")
        }
    }

    impl Error for WrappedError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }
}
