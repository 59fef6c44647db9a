/// Highest IOVA (exclusive) the cursor may hand out. Device addresses are 32 bits wide.
pub const IOVA_LIMIT: u64 = 1 << 32;

/// Bump allocator over the device's IOVA space.
///
/// Ranges are handed out strictly upward and never returned, so a freed buffer's IOVA range
/// is retired for the life of the process.
#[derive(Debug)]
pub struct IovaCursor {
    next: u64,
    limit: u64,
}

impl IovaCursor {
    #[must_use]
    pub const fn new(base: u64) -> Self {
        Self {
            next: base,
            limit: IOVA_LIMIT,
        }
    }

    #[must_use]
    pub const fn with_limit(base: u64, limit: u64) -> Self {
        Self { next: base, limit }
    }

    /// The IOVA the next allocation of `size` bytes would receive, without consuming it.
    #[must_use]
    pub fn peek(&self, size: usize) -> Option<u64> {
        let end = self.next.checked_add(size as u64)?;
        (end <= self.limit).then_some(self.next)
    }

    /// Consumes `size` bytes starting at the current position.
    ///
    /// Only call after a successful [`Self::peek`] with the same size.
    pub fn advance(&mut self, size: usize) {
        self.next += size as u64;
    }

    #[must_use]
    pub const fn position(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let cursor = IovaCursor::new(0x1000);
        assert_eq!(cursor.peek(0x2000), Some(0x1000));
        assert_eq!(cursor.peek(0x2000), Some(0x1000));
        assert_eq!(cursor.position(), 0x1000);
    }

    #[test]
    fn advances_monotonically() {
        let mut cursor = IovaCursor::new(0x1000);
        cursor.advance(0x2000);
        assert_eq!(cursor.peek(0x1000), Some(0x3000));
        cursor.advance(0x1000);
        assert_eq!(cursor.position(), 0x4000);
    }

    #[test]
    fn refuses_to_cross_the_limit() {
        let cursor = IovaCursor::with_limit(0x1000, 0x3000);
        assert_eq!(cursor.peek(0x2000), Some(0x1000));
        assert_eq!(cursor.peek(0x2001), None);
        assert_eq!(IovaCursor::new(u64::MAX - 1).peek(4096), None);
    }
}
