//! Core types shared by the cache, the in-flight registry and the scheduler

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one open-document session.
///
/// Reopening the same file produces a new id, so nothing rendered for a
/// previous session can ever be mistaken for the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Handle passed to the renderer: the session id plus where the document lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentHandle {
    id: DocumentId,
    path: PathBuf,
}

impl DocumentHandle {
    /// Open a new session for the document at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: DocumentId::next(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Scale quantized to one decimal place (stored in tenths for stable hashing)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScaleBucket(u32);

impl ScaleBucket {
    /// Number of buckets per 1.0 of scale
    pub const PER_UNIT: f32 = 10.0;

    /// Quantize a scale. Non-finite and non-positive values land in the
    /// smallest non-zero bucket.
    #[must_use]
    pub fn from_scale(scale: f32) -> Self {
        if !scale.is_finite() || scale <= 0.0 {
            return Self(1);
        }
        Self(((scale * Self::PER_UNIT).round() as u32).max(1))
    }

    #[must_use]
    pub const fn from_tenths(tenths: u32) -> Self {
        Self(tenths)
    }

    #[must_use]
    pub const fn tenths(self) -> u32 {
        self.0
    }

    /// The representative scale sent to the renderer for this bucket
    #[must_use]
    pub fn scale(self) -> f32 {
        self.0 as f32 / Self::PER_UNIT
    }
}

impl fmt::Display for ScaleBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.scale())
    }
}

/// Identity of a cache entry or an in-flight render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub document: DocumentId,
    /// Page number (1-indexed)
    pub page: usize,
    pub bucket: ScaleBucket,
}

impl RenderKey {
    #[must_use]
    pub const fn new(document: DocumentId, page: usize, bucket: ScaleBucket) -> Self {
        Self {
            document,
            page,
            bucket,
        }
    }

    /// Page-index distance to `anchor`
    #[must_use]
    pub fn distance(&self, anchor: usize) -> usize {
        self.page.abs_diff(anchor)
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p{} @{}", self.document, self.page, self.bucket)
    }
}

/// An encoded raster image for one page, as returned by the renderer
#[derive(Clone, PartialEq, Eq)]
pub struct PagePayload {
    bytes: Vec<u8>,
    mime: Option<String>,
}

impl PagePayload {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, mime: None }
    }

    #[must_use]
    pub fn with_mime(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: Some(mime.into()),
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type declared by the backend, if it sent a data URL
    #[must_use]
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Pixel dimensions read from the image header, if the format is known
    #[must_use]
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        imagesize::blob_size(&self.bytes)
            .ok()
            .map(|size| (size.width, size.height))
    }
}

impl fmt::Debug for PagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagePayload")
            .field("len", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_identical_scales_share_a_bucket() {
        assert_eq!(ScaleBucket::from_scale(1.0), ScaleBucket::from_scale(1.04));
        assert_eq!(ScaleBucket::from_scale(1.2), ScaleBucket::from_scale(1.0 + 0.2));
        assert_ne!(ScaleBucket::from_scale(1.0), ScaleBucket::from_scale(1.1));
        assert_eq!(ScaleBucket::from_scale(1.5).tenths(), 15);
    }

    #[test]
    fn degenerate_scales_use_smallest_bucket() {
        assert_eq!(ScaleBucket::from_scale(f32::NAN).tenths(), 1);
        assert_eq!(ScaleBucket::from_scale(-3.0).tenths(), 1);
        assert_eq!(ScaleBucket::from_scale(0.01).tenths(), 1);
    }

    #[test]
    fn reopening_a_path_gets_a_fresh_session() {
        let first = DocumentHandle::new("a.pdf");
        let second = DocumentHandle::new("a.pdf");
        assert_ne!(first.id(), second.id());
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn payload_reads_png_dimensions() {
        // 8-byte signature + IHDR chunk header for a 3x2 image
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&3u32.to_be_bytes());
        png.extend_from_slice(&2u32.to_be_bytes());
        png.extend_from_slice(&[8, 6, 0, 0, 0]);

        let payload = PagePayload::new(png);
        assert_eq!(payload.dimensions(), Some((3, 2)));
        assert_eq!(PagePayload::new(vec![1, 2, 3]).dimensions(), None);
    }
}
