//! Watchpoint (§3 entity, §4.7 "Watchpoints are simpler"): load address +
//! size + access kind, hardware-only, set/unset via `Z2`/`Z3`/`Z4`/`z`.

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
}

impl AccessKind {
    /// `Z`-packet type number: 2 = write, 3 = read, 4 = access (r/w).
    pub fn z_type(self) -> u8 {
        match self {
            AccessKind::Write => 2,
            AccessKind::Read => 3,
            AccessKind::ReadWrite => 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Watchpoint {
    pub address: u64,
    pub size: u32,
    pub kind: AccessKind,
    pub enabled: bool,
    pub ignore_count: u32,
    pub condition: Option<String>,
    pub hit_count: u64,
    pub old_value: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
    installed: bool,
}

impl Watchpoint {
    pub fn new(address: u64, size: u32, kind: AccessKind) -> Self {
        Watchpoint {
            address,
            size,
            kind,
            enabled: true,
            ignore_count: 0,
            condition: None,
            hit_count: 0,
            old_value: None,
            new_value: None,
            installed: false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn mark_installed(&mut self, installed: bool) {
        self.installed = installed;
    }

    /// §8 "size-unsupported" domain error sub-kind fires here when the
    /// stub's `qWatchpointSupportInfo` doesn't list `size`.
    pub fn size_is_supported(&self, supported_sizes: &[u32]) -> bool {
        supported_sizes.is_empty() || supported_sizes.contains(&self.size)
    }

    pub fn record_hit(&mut self, old_value: Option<Vec<u8>>, new_value: Option<Vec<u8>>) -> bool {
        if self.ignore_count > 0 {
            self.ignore_count -= 1;
            return false;
        }
        self.hit_count += 1;
        self.old_value = old_value;
        self.new_value = new_value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_count_suppresses_hits() {
        let mut wp = Watchpoint::new(0x1000, 4, AccessKind::Write);
        wp.ignore_count = 2;
        assert!(!wp.record_hit(None, None));
        assert!(!wp.record_hit(None, None));
        assert!(wp.record_hit(None, None));
        assert_eq!(wp.hit_count, 1);
    }

    #[test]
    fn size_support_check() {
        let wp = Watchpoint::new(0x1000, 8, AccessKind::ReadWrite);
        assert!(wp.size_is_supported(&[]));
        assert!(wp.size_is_supported(&[1, 2, 4, 8]));
        assert!(!wp.size_is_supported(&[1, 2, 4]));
    }

    #[test]
    fn z_type_numbers_match_protocol() {
        assert_eq!(AccessKind::Write.z_type(), 2);
        assert_eq!(AccessKind::Read.z_type(), 3);
        assert_eq!(AccessKind::ReadWrite.z_type(), 4);
    }
}
