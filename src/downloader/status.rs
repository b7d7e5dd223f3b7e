//! Downloader exit status decoding.
//!
//! The external downloader exits with an 8-bit bitmask; each set bit is
//! one error category. No bits set means success.

/// Decoded exit status of a downloader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStatus {
    code: i32,
}

const ERROR_BITS: &[(i32, &str)] = &[
    (1, "unspecified error"),
    (2, "cmdline arguments"),
    (4, "http error"),
    (8, "not found / 404"),
    (16, "auth / login"),
    (32, "format or filter"),
    (64, "no extractor"),
    (128, "os error"),
];

impl DownloadStatus {
    pub fn from_code(code: i32) -> Self {
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Human-readable error description: the names of all set bits joined
    /// with `", "`. Empty for success.
    pub fn error_text(&self) -> String {
        let mut errors = Vec::new();
        for (bit, name) in ERROR_BITS {
            if self.code & bit != 0 {
                errors.push(*name);
            }
        }
        errors.join(", ")
    }
}
