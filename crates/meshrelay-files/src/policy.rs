//! Consumer-side storage policy for completed transfers (spec §4.8).

const TEN_MIB: u64 = 10 * 1024 * 1024;
/// Hard upload ceiling.
pub const MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Preview dimensions for a downscaled large-image preview.
pub const PREVIEW_MAX_DIMENSION: u32 = 200;
/// JPEG quality used when generating a downscaled preview.
pub const PREVIEW_JPEG_QUALITY: f32 = 0.8;

/// How a completed transfer should be persisted, based on size and MIME
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePolicy {
    /// Store the full blob.
    Full,
    /// Store only a downscaled preview (large images).
    PreviewOnly,
    /// Store metadata only; bytes are discarded.
    MetadataOnly,
}

/// Decide the storage policy for a completed transfer.
#[must_use]
pub fn classify(size: u64, mime_type: &str) -> StoragePolicy {
    if size < TEN_MIB {
        StoragePolicy::Full
    } else if mime_type.starts_with("image/") {
        StoragePolicy::PreviewOnly
    } else {
        StoragePolicy::MetadataOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_is_stored_in_full() {
        assert_eq!(classify(1024, "application/pdf"), StoragePolicy::Full);
    }

    #[test]
    fn large_image_gets_preview_only() {
        assert_eq!(classify(TEN_MIB + 1, "image/png"), StoragePolicy::PreviewOnly);
    }

    #[test]
    fn large_non_image_is_metadata_only() {
        assert_eq!(classify(TEN_MIB + 1, "video/mp4"), StoragePolicy::MetadataOnly);
    }

    #[test]
    fn boundary_at_exactly_ten_mib_is_full() {
        assert_eq!(classify(TEN_MIB, "image/png"), StoragePolicy::Full);
    }
}
