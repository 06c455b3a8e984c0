use strum::EnumIter;

use crate::inst::InstType;

/// Memory operation selected at the decode stage of the memory pipeline.
///
/// `Ld`/`Sd` are the 64-bit FP transfers; they move two 32-bit beats over
/// the same port as everything else.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter)]
pub enum MemOp {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Sd,
    Lr,
    Sc,
    AmoSwap,
    AmoAdd,
    AmoXor,
    AmoAnd,
    AmoOr,
    AmoMin,
    AmoMax,
    AmoMinu,
    AmoMaxu,
    Undefined,
}

impl MemOp {
    /// I and S types select by func3; R (the A extension) selects by
    /// func7[6:2]. Anything else is the unknown sentinel.
    pub fn select(ty: InstType, func3: u8, func7: u8) -> Self {
        match ty {
            InstType::I => match func3 {
                0b000 => MemOp::Lb,
                0b001 => MemOp::Lh,
                0b010 => MemOp::Lw,
                0b011 => MemOp::Ld,
                0b100 => MemOp::Lbu,
                0b101 => MemOp::Lhu,
                _ => MemOp::Undefined,
            },
            InstType::S => match func3 {
                0b000 => MemOp::Sb,
                0b001 => MemOp::Sh,
                0b010 => MemOp::Sw,
                0b011 => MemOp::Sd,
                _ => MemOp::Undefined,
            },
            InstType::R => match func7 >> 2 {
                0b00010 => MemOp::Lr,
                0b00011 => MemOp::Sc,
                0b00001 => MemOp::AmoSwap,
                0b00000 => MemOp::AmoAdd,
                0b00100 => MemOp::AmoXor,
                0b01100 => MemOp::AmoAnd,
                0b01000 => MemOp::AmoOr,
                0b10000 => MemOp::AmoMin,
                0b10100 => MemOp::AmoMax,
                0b11000 => MemOp::AmoMinu,
                0b11100 => MemOp::AmoMaxu,
                _ => MemOp::Undefined,
            },
            _ => MemOp::Undefined,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            MemOp::Lb | MemOp::Lh | MemOp::Lw | MemOp::Ld | MemOp::Lbu | MemOp::Lhu | MemOp::Lr
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            MemOp::Sb | MemOp::Sh | MemOp::Sw | MemOp::Sd | MemOp::Sc
        )
    }

    pub fn is_amo(self) -> bool {
        matches!(
            self,
            MemOp::AmoSwap
                | MemOp::AmoAdd
                | MemOp::AmoXor
                | MemOp::AmoAnd
                | MemOp::AmoOr
                | MemOp::AmoMin
                | MemOp::AmoMax
                | MemOp::AmoMinu
                | MemOp::AmoMaxu
        )
    }

    pub fn is_byte(self) -> bool {
        matches!(self, MemOp::Lb | MemOp::Lbu | MemOp::Sb)
    }

    pub fn is_half(self) -> bool {
        matches!(self, MemOp::Lh | MemOp::Lhu | MemOp::Sh)
    }

    pub fn is_word(self) -> bool {
        matches!(self, MemOp::Lw | MemOp::Sw | MemOp::Lr | MemOp::Sc) || self.is_amo()
    }

    pub fn is_double(self) -> bool {
        matches!(self, MemOp::Ld | MemOp::Sd)
    }

    /// Whether the operation needs write permission from the DTLB. AMOs
    /// read first but still fault as stores.
    pub fn writes_memory(self) -> bool {
        self.is_write() || self.is_amo()
    }
}

/// Error tag attached to an in-flight memory entry. Carried unchanged
/// through the remaining stages and converted to an architectural
/// exception at the end of the pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemErrorCode {
    Misaligned,
    PageFault,
    MemoryFault,
}

// Codes per the privileged spec, table 3.6.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter)]
pub enum Exception {
    IllegalInstruction = 2,
    LoadAddressMisaligned = 4,
    LoadAccessFault = 5,
    StoreAmoAddressMisaligned = 6,
    StoreAmoAccessFault = 7,
    LoadPageFault = 13,
    StoreAmoPageFault = 15,
}

impl Exception {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a pipeline error tag to the architectural exception, using the
    /// store flavour for writes and AMOs.
    pub fn from_error(error: MemErrorCode, store: bool) -> Self {
        match (error, store) {
            (MemErrorCode::Misaligned, false) => Exception::LoadAddressMisaligned,
            (MemErrorCode::Misaligned, true) => Exception::StoreAmoAddressMisaligned,
            (MemErrorCode::PageFault, false) => Exception::LoadPageFault,
            (MemErrorCode::PageFault, true) => Exception::StoreAmoPageFault,
            (MemErrorCode::MemoryFault, false) => Exception::LoadAccessFault,
            (MemErrorCode::MemoryFault, true) => Exception::StoreAmoAccessFault,
        }
    }
}
