//! Operation classes.
//!
//! An op class is a family of operations sharing functional-unit kind and
//! latency characteristics. The scheduler routes instructions to issue
//! queues purely by op class; it never interprets instruction semantics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operation class, selecting FU kind and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpClass {
    /// Integer add/sub/logic/shift.
    IntAlu,
    /// Integer multiply.
    IntMult,
    /// Integer divide.
    IntDiv,
    /// The multiply half of a fused multiply-add.
    ///
    /// Does not occupy an issue-queue entry of its own: exempt from
    /// `inst_count`/`op_count` bookkeeping on both insert and removal.
    FmaMul,
    /// Floating-point add/sub/compare.
    FloatAdd,
    /// Floating-point multiply.
    FloatMul,
    /// Floating-point divide/sqrt.
    FloatDiv,
    /// Vector arithmetic.
    VecAlu,
    /// Memory read (load).
    MemRead,
    /// Memory write (store).
    MemWrite,
}

impl OpClass {
    /// Number of op classes; sizes the per-class lookup tables.
    pub const COUNT: usize = 10;

    /// Dense index for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::IntAlu => 0,
            Self::IntMult => 1,
            Self::IntDiv => 2,
            Self::FmaMul => 3,
            Self::FloatAdd => 4,
            Self::FloatMul => 5,
            Self::FloatDiv => 6,
            Self::VecAlu => 7,
            Self::MemRead => 8,
            Self::MemWrite => 9,
        }
    }

    /// All op classes, in `index()` order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::IntAlu,
        Self::IntMult,
        Self::IntDiv,
        Self::FmaMul,
        Self::FloatAdd,
        Self::FloatMul,
        Self::FloatDiv,
        Self::VecAlu,
        Self::MemRead,
        Self::MemWrite,
    ];

    /// True for the integer pipes, whose dispatch is load-balanced by
    /// per-class residency rather than randomised.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::IntAlu | Self::IntMult | Self::IntDiv)
    }

    /// True for memory references.
    #[must_use]
    pub const fn is_mem(self) -> bool {
        matches!(self, Self::MemRead | Self::MemWrite)
    }

    /// Name string used in traces and panics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IntAlu => "IntAlu",
            Self::IntMult => "IntMult",
            Self::IntDiv => "IntDiv",
            Self::FmaMul => "FmaMul",
            Self::FloatAdd => "FloatAdd",
            Self::FloatMul => "FloatMul",
            Self::FloatDiv => "FloatDiv",
            Self::VecAlu => "VecAlu",
            Self::MemRead => "MemRead",
            Self::MemWrite => "MemWrite",
        }
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
