use std::fmt;

use crate::mem_op::MemErrorCode;

/// Handle minted by an allocator (reorder buffer row, physical destination)
/// and used later to commit or wake the allocated entry. Doubles as the
/// broadcast tag on the common data bus.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Receipt(u32);

impl Receipt {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Receipt {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

impl From<usize> for Receipt {
    fn from(x: usize) -> Self {
        Self(x.try_into().expect("receipt out of range"))
    }
}

impl fmt::Debug for Receipt {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Receipt({})", self.0)
    }
}

// https://en.wikichip.org/wiki/risc-v/standard_extensions
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum InstType {
    #[default]
    Unk,
    R,
    R4,
    I,
    S,
    B,
    U,
    J,
}

/// Which reservation station an instruction is dispatched to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum QueueKind {
    #[default]
    Arithmetic,
    Memory,
    Branch,
}

/// A published `{tag, value}` pair on the common data bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub tag: Receipt,
    pub value: u64,
}

/// An operand slot: either resolved to a value or waiting on a broadcast.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueOrTag {
    Valid(u64),
    Invalid(Receipt),
}

impl ValueOrTag {
    pub fn value(self) -> Option<u64> {
        match self {
            ValueOrTag::Valid(x) => Some(x),
            ValueOrTag::Invalid(_) => None,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, ValueOrTag::Invalid(_))
    }

    /// Capture a matching broadcast. The match is combinational: it applies
    /// within the same cycle the broadcast is published.
    pub fn listen(&mut self, bus: &[Broadcast]) {
        if let ValueOrTag::Invalid(tag) = *self {
            if let Some(b) = bus.iter().find(|b| b.tag == tag) {
                *self = ValueOrTag::Valid(b.value);
            }
        }
    }
}

impl Default for ValueOrTag {
    fn default() -> Self {
        ValueOrTag::Valid(0)
    }
}

/// An issued instruction held at a reservation station until its operands
/// resolve and a functional unit accepts it.
#[derive(Debug, Clone, Default)]
pub struct ExecuteEntry {
    pub opcode: u8,
    pub ty: InstType,
    pub kind: QueueKind,
    pub rs1: ValueOrTag,
    pub rs2: ValueOrTag,
    pub rs3: Option<ValueOrTag>,
    pub rd: Receipt,
    pub func3: u8,
    pub func7: u8,
    /// Sign-extended immediate.
    pub imm: u32,
    pub pc: u32,
    /// Next PC predicted at fetch.
    pub spec: u32,
    /// Fallthrough next PC.
    pub next: u32,
    pub error: Option<MemErrorCode>,
    pub valid: bool,
}

impl ExecuteEntry {
    pub fn listen(&mut self, bus: &[Broadcast]) {
        self.rs1.listen(bus);
        self.rs2.listen(bus);
        if let Some(rs3) = &mut self.rs3 {
            rs3.listen(bus);
        }
    }

    /// An entry may fire once every operand slot has resolved. Invalid
    /// entries are always fireable so they drain as bubbles.
    pub fn ready(&self) -> bool {
        if !self.valid {
            return true;
        }

        !self.rs1.is_pending()
            && !self.rs2.is_pending()
            && !self.rs3.map(ValueOrTag::is_pending).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_resolves_matching_tag() {
        let mut slot = ValueOrTag::Invalid(Receipt::from(3u32));
        slot.listen(&[Broadcast {
            tag: Receipt::from(2u32),
            value: 10,
        }]);
        assert!(slot.is_pending());

        slot.listen(&[
            Broadcast {
                tag: Receipt::from(2u32),
                value: 10,
            },
            Broadcast {
                tag: Receipt::from(3u32),
                value: 77,
            },
        ]);
        assert_eq!(slot, ValueOrTag::Valid(77));
    }

    #[test]
    fn test_bubble_is_always_ready() {
        let entry = ExecuteEntry {
            rs1: ValueOrTag::Invalid(Receipt::from(1u32)),
            valid: false,
            ..Default::default()
        };
        assert!(entry.ready());
    }

    #[test]
    fn test_ready_waits_for_all_slots() {
        let mut entry = ExecuteEntry {
            rs1: ValueOrTag::Valid(1),
            rs2: ValueOrTag::Invalid(Receipt::from(9u32)),
            valid: true,
            ..Default::default()
        };
        assert!(!entry.ready());

        entry.listen(&[Broadcast {
            tag: Receipt::from(9u32),
            value: 2,
        }]);
        assert!(entry.ready());
    }
}
