use crate::label::Label;

/// A still image captured from the camera at one moment.
///
/// Frames are created by the capture loop each cycle, handed to the
/// classifier by reference, optionally archived, then dropped.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            captured_at_ms,
            seq,
        }
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    /// Relative path for archiving this frame together with its label.
    /// e.g. "frames/2026-02-18/20260218T093000000Z_000007_ad.jpg"
    pub fn archive_key(&self, prefix: &str, label: Label) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let date = dt.format("%Y-%m-%d");
        let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
        format!("{prefix}{date}/{ts}_{seq:06}_{label}.jpg", seq = self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_key_layout() {
        // 2024-02-19T00:26:40Z
        let frame = Frame::new(vec![0xFF, 0xD8], 1708302400000, 7);
        let key = frame.archive_key("frames/", Label::Ad);
        assert_eq!(key, "frames/2024-02-19/20240219T002640000Z_000007_ad.jpg");
    }

    #[test]
    fn archive_key_carries_label() {
        let frame = Frame::new(vec![], 1708302400000, 12);
        assert!(frame.archive_key("", Label::Show).ends_with("_000012_show.jpg"));
        assert!(frame.archive_key("", Label::Unknown).ends_with("_000012_unknown.jpg"));
    }

    #[test]
    fn len_reports_payload_size() {
        let frame = Frame::new(vec![1, 2, 3], 0, 0);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
        assert!(Frame::new(vec![], 0, 0).is_empty());
    }
}
