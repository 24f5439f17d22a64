//! Operation flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitset of flags accepted by [`ShmCache::set`](crate::ShmCache::set) and
/// [`ShmCache::delete`](crate::ShmCache::delete).
///
/// Flags combine with `|`:
///
/// ```
/// use shm_cache::Flags;
///
/// let flags = Flags::UPDATE | Flags::LOCAL;
/// assert!(flags.contains(Flags::LOCAL));
/// assert!(!flags.contains(Flags::ABSEXPIRE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u64);

impl Flags {
    /// No flags.
    pub const NONE: Flags = Flags(0);
    /// Overwrite the value of an existing key.
    pub const UPDATE: Flags = Flags(1 << 1);
    /// `expires` is already an absolute epoch time.
    pub const ABSEXPIRE: Flags = Flags(1 << 2);
    /// Do not broadcast this mutation to replication peers.
    pub const LOCAL: Flags = Flags(1 << 3);
    /// Store the value but never return it from `get`.
    pub const UNGETTABLE: Flags = Flags(1 << 4);
    /// Treat the value as an 8 byte integer operand.
    pub const MATH: Flags = Flags(1 << 5);
    /// Math: add the operand.
    pub const INC: Flags = Flags(1 << 6);
    /// Math: subtract the operand.
    pub const DEC: Flags = Flags(1 << 7);
    /// Math: multiply by the operand.
    pub const MUL: Flags = Flags(1 << 8);
    /// Math: divide by the operand.
    pub const DIV: Flags = Flags(1 << 9);
    /// Keep the stored expiration on update.
    pub const FIXEXPIRE: Flags = Flags(1 << 10);

    /// Build flags from raw bits. Unknown bits are kept.
    pub const fn from_bits(bits: u64) -> Self {
        Flags(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 10] = [
            (Flags::UPDATE, "UPDATE"),
            (Flags::ABSEXPIRE, "ABSEXPIRE"),
            (Flags::LOCAL, "LOCAL"),
            (Flags::UNGETTABLE, "UNGETTABLE"),
            (Flags::MATH, "MATH"),
            (Flags::INC, "INC"),
            (Flags::DEC, "DEC"),
            (Flags::MUL, "MUL"),
            (Flags::DIV, "DIV"),
            (Flags::FIXEXPIRE, "FIXEXPIRE"),
        ];

        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}
