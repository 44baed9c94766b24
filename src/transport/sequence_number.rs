use std::fmt::{Display, Formatter};

/// Sequence number of a packet within one session. Numbers are assigned on send, starting at 1
///  and wrapping from the configured maximum back to 1 - 0 is never assigned, so it can safely
///  be used as 'no sequence number yet' on the wire.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SequenceNumber(u32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl SequenceNumber {
    pub const UNASSIGNED: SequenceNumber = SequenceNumber(0);

    /// The wire format has room for 24 bits
    pub const MAX_ON_WIRE: u32 = 0xFF_FFFF;

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }

    pub fn next(&self, max_sequence: u32) -> SequenceNumber {
        if self.0 >= max_sequence {
            SequenceNumber(1)
        }
        else {
            SequenceNumber(self.0 + 1)
        }
    }
}
