use std::cmp::Ordering;
use std::io;

use crate::read::Readable;

/// Major/minor class-file version pair as read from the file header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

impl ClassVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        ClassVersion { major, minor }
    }

    /// major versions 45..60 are supported; major >= 56 restricts minor to 0 or 65535.
    pub fn is_supported(&self) -> bool {
        if !(45..=60).contains(&self.major) {
            return false;
        }

        if self.major >= 56 {
            return self.minor == 0 || self.minor == 65535;
        }

        true
    }
}

impl Readable for ClassVersion {
    fn read<T: io::Read>(buffer: &mut T) -> io::Result<Self> {
        // Minor version precedes major in the class file layout.
        let minor = u16::read(buffer)?;
        let major = u16::read(buffer)?;
        Ok(ClassVersion { major, minor })
    }
}

impl PartialOrd for ClassVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => self.minor.cmp(&other.minor),
            x => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pre_45() {
        assert!(!ClassVersion::new(44, 0).is_supported());
    }

    #[test]
    fn accepts_range() {
        assert!(ClassVersion::new(45, 3).is_supported());
        assert!(ClassVersion::new(60, 0).is_supported());
    }

    #[test]
    fn gates_minor_on_recent_major() {
        assert!(ClassVersion::new(56, 0).is_supported());
        assert!(ClassVersion::new(56, 65535).is_supported());
        assert!(!ClassVersion::new(56, 1).is_supported());
    }

    #[test]
    fn orders_by_major_then_minor() {
        assert!(ClassVersion::new(52, 0) < ClassVersion::new(53, 0));
        assert!(ClassVersion::new(52, 0) < ClassVersion::new(52, 1));
    }
}
