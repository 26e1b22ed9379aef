//! Instruction decoding seam.
//!
//! The analyzer consumes the disassembler as a black box: one call
//! decodes one instruction and reports its control-flow class, length
//! and direct targets. [`CapstoneDecoder`] is the production backend.

use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use capstone::{InsnGroupId, InsnGroupType};

use remora_debugger::Address;

use crate::Result;

/// Control-flow class of one decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsnClass {
    Normal,
    Call,
    /// Unconditional jump.
    Jump,
    CondJump,
    Return,
    /// Trap instruction (breakpoint, software interrupt).
    Trap,
    /// The bytes do not decode.
    Invalid,
}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedInsn {
    pub class: InsnClass,

    /// Length in bytes; 0 for [`InsnClass::Invalid`].
    pub len: usize,

    /// Direct branch/call targets, already resolved to absolute
    /// addresses. Empty for indirect transfers.
    pub targets: Vec<Address>,
}

impl DecodedInsn {
    pub(crate) fn invalid() -> Self {
        Self {
            class: InsnClass::Invalid,
            len: 0,
            targets: Vec::new(),
        }
    }

    /// The single direct target, when the instruction has one.
    pub fn direct_target(&self) -> Option<Address> {
        self.targets.first().copied()
    }

    /// Whether this is a control transfer with no direct target.
    pub fn is_indirect_branch(&self) -> bool {
        matches!(self.class, InsnClass::Jump | InsnClass::Call) && self.targets.is_empty()
    }
}

/// Decodes one instruction at a time.
pub trait InstructionDecoder {
    /// Decodes the instruction starting at `bytes[0]`, which sits at
    /// `addr` in the debuggee. Undecodable input is reported as
    /// [`InsnClass::Invalid`], not as an error.
    fn decode(&self, bytes: &[u8], addr: Address) -> DecodedInsn;
}

/// Capstone-backed decoder.
pub struct CapstoneDecoder {
    cs: Capstone,
}

impl CapstoneDecoder {
    /// Decoder for 64-bit x86 code.
    pub fn new_x86_64() -> Result<Self> {
        let cs = Capstone::new()
            .x86()
            .mode(capstone::arch::x86::ArchMode::Mode64)
            .detail(true)
            .build()?;

        Ok(Self { cs })
    }

    /// Decoder for 32-bit x86 code.
    pub fn new_x86() -> Result<Self> {
        let cs = Capstone::new()
            .x86()
            .mode(capstone::arch::x86::ArchMode::Mode32)
            .detail(true)
            .build()?;

        Ok(Self { cs })
    }

    /// Decoder for the build architecture.
    pub fn new_host() -> Result<Self> {
        #[cfg(target_arch = "x86_64")]
        {
            Self::new_x86_64()
        }
        #[cfg(target_arch = "x86")]
        {
            Self::new_x86()
        }
    }
}

impl InstructionDecoder for CapstoneDecoder {
    fn decode(&self, bytes: &[u8], addr: Address) -> DecodedInsn {
        let Ok(insns) = self.cs.disasm_count(bytes, addr, 1) else {
            return DecodedInsn::invalid();
        };

        let Some(insn) = insns.first() else {
            return DecodedInsn::invalid();
        };

        let len = insn.bytes().len();

        let Ok(detail) = self.cs.insn_detail(insn) else {
            return DecodedInsn {
                class: InsnClass::Normal,
                len,
                targets: Vec::new(),
            };
        };

        let has_group =
            |group: u32| detail.groups().contains(&InsnGroupId(group as u8));

        let class = if has_group(InsnGroupType::CS_GRP_RET) {
            InsnClass::Return
        } else if has_group(InsnGroupType::CS_GRP_INT) {
            InsnClass::Trap
        } else if has_group(InsnGroupType::CS_GRP_CALL) {
            InsnClass::Call
        } else if has_group(InsnGroupType::CS_GRP_JUMP) {
            // Everything in the jump group except the plain `jmp`
            // family is conditional.
            match insn.mnemonic() {
                Some("jmp") | Some("ljmp") => InsnClass::Jump,
                _ => InsnClass::CondJump,
            }
        } else {
            InsnClass::Normal
        };

        let targets = match class {
            InsnClass::Call | InsnClass::Jump | InsnClass::CondJump => detail
                .arch_detail()
                .operands()
                .into_iter()
                .filter_map(|op| match op {
                    ArchOperand::X86Operand(op) => match op.op_type {
                        X86OperandType::Imm(imm) => Some(imm as Address),
                        _ => None,
                    },
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        DecodedInsn {
            class,
            len,
            targets,
        }
    }
}
