use serde::Serialize;

use crate::core::error::{DownloadError, DownloadResult};

/// 半开区间 `[start, end)`，构造与修改时都保证 `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    start: u64,
    end: u64,
}

impl Range {
    pub fn new(start: u64, end: u64) -> DownloadResult<Self> {
        if start > end {
            return Err(DownloadError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    pub fn set_start(&mut self, start: u64) -> DownloadResult<()> {
        if start > self.end {
            return Err(DownloadError::InvalidRange { start, end: self.end });
        }
        self.start = start;
        Ok(())
    }

    pub fn set_end(&mut self, end: u64) -> DownloadResult<()> {
        if end < self.start {
            return Err(DownloadError::InvalidRange { start: self.start, end });
        }
        self.end = end;
        Ok(())
    }

    /// HTTP Range 头的取值，HTTP 的结束位置是闭区间
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1).max(self.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_length() {
        let range = Range::new(1000, 2500).unwrap();
        assert_eq!(range.length(), 1500);
        assert_eq!(Range::new(7, 7).unwrap().length(), 0);
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let error = Range::new(10, 5).unwrap_err();
        assert!(matches!(error, DownloadError::InvalidRange { start: 10, end: 5 }));
    }

    #[test]
    fn test_range_mutation_revalidates() {
        let mut range = Range::new(0, 100).unwrap();
        assert!(range.set_start(101).is_err());
        assert_eq!(range.start(), 0);

        assert!(range.set_end(50).is_ok());
        assert!(range.set_start(50).is_ok());
        assert_eq!(range.length(), 0);

        assert!(range.set_end(49).is_err());
        assert_eq!(range.end(), 50);
    }

    #[test]
    fn test_header_value_is_inclusive() {
        assert_eq!(Range::new(0, 1000).unwrap().header_value(), "bytes=0-999");
        assert_eq!(Range::new(2000, 2500).unwrap().header_value(), "bytes=2000-2499");
    }
}
