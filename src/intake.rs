// src/intake.rs
//
// File intake checks run before anything is submitted to the pool.
// Rejected files never become tasks.

use crate::error::ImageBatchError;

/// Input mime types accepted for any transformation.
pub const ALLOWED_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// Per-file ceiling: 100 MiB.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Aggregate ceiling on constrained devices: 500 MiB.
pub const MAX_TOTAL_SIZE_MOBILE: u64 = 500 * 1024 * 1024;

/// Aggregate ceiling on desktop: 1.5 GiB.
pub const MAX_TOTAL_SIZE_DESKTOP: u64 = 3 * 512 * 1024 * 1024;

/// Which aggregate ceiling applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntakeProfile {
    Mobile,
    #[default]
    Desktop,
}

impl IntakeProfile {
    pub fn max_total_size(self) -> u64 {
        match self {
            IntakeProfile::Mobile => MAX_TOTAL_SIZE_MOBILE,
            IntakeProfile::Desktop => MAX_TOTAL_SIZE_DESKTOP,
        }
    }

    fn limit_label(self) -> &'static str {
        match self {
            IntakeProfile::Mobile => "500MB",
            IntakeProfile::Desktop => "1.5GB",
        }
    }
}

/// What intake needs to know about a candidate file.
pub trait IntakeFile {
    fn mime_type(&self) -> &str;
    fn size(&self) -> u64;
}

impl IntakeFile for crate::batch::BatchItem {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug)]
pub struct Rejected<F> {
    pub file: F,
    pub reason: ImageBatchError,
}

#[derive(Debug)]
pub struct ValidationOutcome<F> {
    pub valid: Vec<F>,
    pub invalid: Vec<Rejected<F>>,
}

/// Split `new_files` into accepted and rejected files.
///
/// The aggregate ceiling counts `current_files` (already accepted earlier)
/// plus every file accepted so far in this call. Checks run in order: type,
/// per-file size, aggregate size.
pub fn validate_files<F: IntakeFile>(
    new_files: Vec<F>,
    current_files: &[F],
    profile: IntakeProfile,
) -> ValidationOutcome<F> {
    let max_total = profile.max_total_size();
    let mut total: u64 = current_files.iter().map(IntakeFile::size).sum();
    let mut outcome = ValidationOutcome {
        valid: Vec::new(),
        invalid: Vec::new(),
    };

    for file in new_files {
        let reason = if !ALLOWED_TYPES.iter().any(|allowed| *allowed == file.mime_type()) {
            Some(ImageBatchError::validation(format!(
                "unsupported file type '{}'",
                file.mime_type()
            )))
        } else if file.size() > MAX_FILE_SIZE {
            Some(ImageBatchError::validation("file too large (max 100MB)"))
        } else if total.saturating_add(file.size()) > max_total {
            Some(ImageBatchError::validation(format!(
                "total size limit exceeded (max {})",
                profile.limit_label()
            )))
        } else {
            None
        };

        match reason {
            Some(reason) => outcome.invalid.push(Rejected { file, reason }),
            None => {
                total += file.size();
                outcome.valid.push(file);
            }
        }
    }
    outcome
}
