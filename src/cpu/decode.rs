// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Opcode decoding.
//!
//! Rather than a hand-written match arm per opcode, every unprefixed and
//! CB-prefixed opcode is decomposed into the bitfields `x` (bits 7-6),
//! `y` (bits 5-3), `z` (bits 2-0), and, where `y` itself splits further,
//! `p` (bits 5-4) and `q` (bit 3). Each field selects uniformly from a
//! small table (registers, register pairs, conditions, ALU operations),
//! which is what actually reproduces the SM83's opcode map; the
//! resulting [`Instruction`] only names the operation, not its encoding.

use crate::GameboyError;

/// One of the eight 8-bit registers the `z`/`y` fields of an opcode can
/// select, or the `(HL)` indirect operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand8 {
	B,
	C,
	D,
	E,
	H,
	L,
	IndirectHl,
	A,
}

/// One of the four 16-bit register pairs the `p` field selects for
/// stack-pointer-relative instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
	Bc,
	De,
	Hl,
	Sp,
}

/// The register pair PUSH/POP select instead of SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16Stack {
	Bc,
	De,
	Hl,
	Af,
}

/// The addressing mode of the four `(BC)`/`(DE)`/`(HL+)`/`(HL-)` load
/// forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirect {
	Bc,
	De,
	HlInc,
	HlDec,
}

/// A branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
	Nz,
	Z,
	Nc,
	C,
}

/// One of the eight accumulator ALU operations `x=2` (register operand)
/// and `x=3,z=6` (immediate operand) share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
	Add,
	Adc,
	Sub,
	Sbc,
	And,
	Xor,
	Or,
	Cp,
}

/// One of the eight CB-prefixed rotate/shift operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotOp {
	Rlc,
	Rrc,
	Rl,
	Rr,
	Sla,
	Sra,
	Swap,
	Srl,
}

/// A fully decoded instruction, independent of its opcode encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
	Nop,
	Stop,
	Halt,
	/// One of the DMG's undefined opcodes.
	Illegal(u8),

	LdRR(Operand8, Operand8),
	LdRImm(Operand8),
	LdRpImm(Reg16),
	LdIndirectFromA(Indirect),
	LdAFromIndirect(Indirect),
	LdNnSp,
	AddHlRp(Reg16),
	IncRp(Reg16),
	DecRp(Reg16),
	IncR(Operand8),
	DecR(Operand8),
	Rlca,
	Rrca,
	Rla,
	Rra,
	Daa,
	Cpl,
	Scf,
	Ccf,

	JrImm,
	JrCondImm(Condition),

	AluA(AluOp, Operand8),
	AluAImm(AluOp),

	RetCond(Condition),
	Ret,
	Reti,
	JpHl,
	LdSpHl,
	LdhWriteA,
	AddSpImm,
	LdhReadA,
	LdHlSpImm,
	PopRp(Reg16Stack),
	PushRp(Reg16Stack),
	JpCondImm(Condition),
	LdhWriteAC,
	LdNnA,
	LdhReadAC,
	LdANn,
	JpImm,
	Di,
	Ei,
	CallCondImm(Condition),
	CallImm,
	Rst(u8),

	Rot(RotOp, Operand8),
	Bit(u8, Operand8),
	Res(u8, Operand8),
	Set(u8, Operand8),
}

const R: [Operand8; 8] = [
	Operand8::B,
	Operand8::C,
	Operand8::D,
	Operand8::E,
	Operand8::H,
	Operand8::L,
	Operand8::IndirectHl,
	Operand8::A,
];

const RP: [Reg16; 4] = [Reg16::Bc, Reg16::De, Reg16::Hl, Reg16::Sp];
const RP2: [Reg16Stack; 4] = [Reg16Stack::Bc, Reg16Stack::De, Reg16Stack::Hl, Reg16Stack::Af];
const CC: [Condition; 4] = [Condition::Nz, Condition::Z, Condition::Nc, Condition::C];
const ALU: [AluOp; 8] =
	[AluOp::Add, AluOp::Adc, AluOp::Sub, AluOp::Sbc, AluOp::And, AluOp::Xor, AluOp::Or, AluOp::Cp];
const ROT: [RotOp; 8] =
	[RotOp::Rlc, RotOp::Rrc, RotOp::Rl, RotOp::Rr, RotOp::Sla, RotOp::Sra, RotOp::Swap, RotOp::Srl];
const INDIRECT: [Indirect; 4] = [Indirect::Bc, Indirect::De, Indirect::HlInc, Indirect::HlDec];

/// The number of immediate operand bytes an instruction's encoding
/// consumes from the byte stream following its opcode (0, 1 or 2), not
/// counting a 0xCB prefix byte itself.
pub fn operand_len(instr: Instruction) -> u8 {
	use Instruction::*;
	match instr {
		LdRImm(_) | JrImm | JrCondImm(_) | AluAImm(_) | LdhWriteA | LdhReadA | AddSpImm | LdHlSpImm => 1,
		LdRpImm(_) | LdNnSp | JpCondImm(_) | LdNnA | LdANn | JpImm | CallCondImm(_) | CallImm => 2,
		_ => 0,
	}
}

/// Decode one unprefixed opcode byte.
pub fn decode(opcode: u8) -> Instruction {
	use Instruction::*;

	let x = opcode >> 6;
	let y = (opcode >> 3) & 0x7;
	let z = opcode & 0x7;
	let p = (y >> 1) & 0x3;
	let q = y & 1;

	match x {
		0 => match z {
			0 => match y {
				0 => Nop,
				1 => LdNnSp,
				2 => Stop,
				3 => JrImm,
				4..=7 => JrCondImm(CC[(y - 4) as usize]),
				_ => unreachable!(),
			},
			1 => {
				if q == 0 {
					LdRpImm(RP[p as usize])
				} else {
					AddHlRp(RP[p as usize])
				}
			}
			2 => {
				if q == 0 {
					LdIndirectFromA(INDIRECT[p as usize])
				} else {
					LdAFromIndirect(INDIRECT[p as usize])
				}
			}
			3 => {
				if q == 0 {
					IncRp(RP[p as usize])
				} else {
					DecRp(RP[p as usize])
				}
			}
			4 => IncR(R[y as usize]),
			5 => DecR(R[y as usize]),
			6 => LdRImm(R[y as usize]),
			7 => match y {
				0 => Rlca,
				1 => Rrca,
				2 => Rla,
				3 => Rra,
				4 => Daa,
				5 => Cpl,
				6 => Scf,
				7 => Ccf,
				_ => unreachable!(),
			},
			_ => unreachable!(),
		},

		1 => {
			if z == 6 && y == 6 {
				Halt
			} else {
				LdRR(R[y as usize], R[z as usize])
			}
		}

		2 => AluA(ALU[y as usize], R[z as usize]),

		3 => match z {
			0 => match y {
				0..=3 => RetCond(CC[y as usize]),
				4 => LdhWriteA,
				5 => AddSpImm,
				6 => LdhReadA,
				7 => LdHlSpImm,
				_ => unreachable!(),
			},
			1 => {
				if q == 0 {
					PopRp(RP2[p as usize])
				} else {
					match p {
						0 => Ret,
						1 => Reti,
						2 => JpHl,
						3 => LdSpHl,
						_ => unreachable!(),
					}
				}
			}
			2 => match y {
				0..=3 => JpCondImm(CC[y as usize]),
				4 => LdhWriteAC,
				5 => LdNnA,
				6 => LdhReadAC,
				7 => LdANn,
				_ => unreachable!(),
			},
			3 => match y {
				0 => JpImm,
				// y=1 is the 0xCB prefix; handled one level up, before
				// this decoder is ever reached.
				6 => Di,
				7 => Ei,
				_ => Illegal(opcode),
			},
			4 => match y {
				0..=3 => CallCondImm(CC[y as usize]),
				_ => Illegal(opcode),
			},
			5 => {
				if q == 0 {
					PushRp(RP2[p as usize])
				} else if p == 0 {
					CallImm
				} else {
					Illegal(opcode)
				}
			}
			6 => AluAImm(ALU[y as usize]),
			7 => Rst(y * 8),
			_ => unreachable!(),
		},

		_ => unreachable!(),
	}
}

/// Decode one CB-prefixed opcode byte. The CB page has no irregular
/// entries: every byte maps to a rotate/shift, BIT, RES or SET.
pub fn decode_cb(opcode: u8) -> Instruction {
	use Instruction::*;

	let x = opcode >> 6;
	let y = (opcode >> 3) & 0x7;
	let z = opcode & 0x7;
	let operand = R[z as usize];

	match x {
		0 => Rot(ROT[y as usize], operand),
		1 => Bit(y, operand),
		2 => Res(y, operand),
		3 => Set(y, operand),
		_ => unreachable!(),
	}
}

/// A handful of opcodes never appear in any valid DMG program; `decode`
/// still returns an answer for them (`Illegal`) since the CPU must be
/// able to surface a [`GameboyError::IllegalOpcode`] rather than panic.
pub fn check_illegal(instr: Instruction) -> Result<Instruction, GameboyError> {
	match instr {
		Instruction::Illegal(opcode) => Err(GameboyError::IllegalOpcode(opcode)),
		other => Ok(other),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_unprefixed_opcode_decodes_to_something() {
		for opcode in 0u8..=0xFF {
			let _ = decode(opcode);
		}
	}

	#[test]
	fn every_cb_opcode_decodes_to_a_rotate_bit_res_or_set() {
		for opcode in 0u8..=0xFF {
			match decode_cb(opcode) {
				Instruction::Rot(..) | Instruction::Bit(..) | Instruction::Res(..) | Instruction::Set(..) => {}
				other => panic!("unexpected CB decode for {:#04x}: {:?}", opcode, other),
			}
		}
	}

	#[test]
	fn known_illegal_opcodes_are_flagged() {
		for &opcode in &[0xD3u8, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD] {
			assert!(matches!(decode(opcode), Instruction::Illegal(_)), "{:#04x} should be illegal", opcode);
		}
	}

	#[test]
	fn nop_and_halt_decode_correctly() {
		assert_eq!(decode(0x00), Instruction::Nop);
		assert_eq!(decode(0x76), Instruction::Halt);
	}

	#[test]
	fn ld_b_c_decodes_register_to_register_move() {
		assert_eq!(decode(0x41), Instruction::LdRR(Operand8::B, Operand8::C));
	}
}
