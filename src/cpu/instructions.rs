// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Turning a decoded [`decode::Instruction`] into a sequence of queued
//! micro-ops.
//!
//! Every function here runs synchronously on the cycle the opcode (or,
//! for a CB instruction, the 0xCB page byte) was fetched, and returns
//! having pushed onto `cpu`'s queue whatever further bus cycles the
//! instruction still needs. A register-only ALU op pushes nothing at
//! all and is fully done by the time `dispatch` returns; a CALL pushes
//! a chain of four more ops whose commits push further ops still.

use alloc::boxed::Box;

use super::alu;
use super::decode::{AluOp, Condition, Indirect, Instruction, Operand8, Reg16, Reg16Stack, RotOp};
use super::state::registers::{Flag, Register};
use super::Cpu;

use crate::GameboyError;

fn reg_of(operand: Operand8) -> Register {
	match operand {
		Operand8::B => Register::B,
		Operand8::C => Register::C,
		Operand8::D => Register::D,
		Operand8::E => Register::E,
		Operand8::H => Register::H,
		Operand8::L => Register::L,
		Operand8::A => Register::A,
		Operand8::IndirectHl => unreachable!("(HL) has no register to read directly"),
	}
}

fn reg16_of(rp: Reg16) -> Register {
	match rp {
		Reg16::Bc => Register::BC,
		Reg16::De => Register::DE,
		Reg16::Hl => Register::HL,
		Reg16::Sp => Register::SP,
	}
}

fn reg16_stack_of(rp: Reg16Stack) -> Register {
	match rp {
		Reg16Stack::Bc => Register::BC,
		Reg16Stack::De => Register::DE,
		Reg16Stack::Hl => Register::HL,
		Reg16Stack::Af => Register::AF,
	}
}

fn cond_holds(cpu: &Cpu, cond: Condition) -> bool {
	let f = cpu.registers();
	match cond {
		Condition::Nz => !f.get_flag(Flag::Z),
		Condition::Z => f.get_flag(Flag::Z),
		Condition::Nc => !f.get_flag(Flag::C),
		Condition::C => f.get_flag(Flag::C),
	}
}

fn apply_flags(cpu: &mut Cpu, flags: alu::Flags) {
	let f = cpu.registers_mut();
	f.set_flag(Flag::Z, flags.z);
	f.set_flag(Flag::N, flags.n);
	f.set_flag(Flag::H, flags.h);
	f.set_flag(Flag::C, flags.c);
}

fn read_operand8(cpu: &Cpu, operand: Operand8) -> u8 {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.mmap.peek(hl).unwrap_or(0xFF)
		}
		other => cpu.registers().get(reg_of(other)) as u8,
	}
}

/// Dispatches one already-fetched, already-decoded instruction: runs
/// whatever part of it can happen on this same cycle, and queues the
/// rest.
pub(super) fn dispatch(cpu: &mut Cpu, instr: Instruction) -> Result<(), GameboyError> {
	use Instruction::*;

	match instr {
		Nop => {}
		Stop => cpu.stopped = true,
		Halt => {
			if !cpu.ime && cpu.mmap.any_interrupt_pending() {
				cpu.halt_bug = true;
			}
			cpu.halted = true;
		}
		Illegal(opcode) => return Err(GameboyError::IllegalOpcode(opcode)),

		LdRR(dst, src) => ld_r_r(cpu, dst, src),
		LdRImm(dst) => ld_r_imm(cpu, dst),
		LdRpImm(rp) => ld_rp_imm(cpu, rp),
		LdIndirectFromA(indirect) => ld_indirect_from_a(cpu, indirect),
		LdAFromIndirect(indirect) => ld_a_from_indirect(cpu, indirect),
		LdNnSp => ld_nn_sp(cpu),
		AddHlRp(rp) => add_hl_rp(cpu, rp),
		IncRp(rp) => inc_dec_rp(cpu, rp, 1),
		DecRp(rp) => inc_dec_rp(cpu, rp, -1),
		IncR(operand) => inc_dec_r(cpu, operand, alu::inc),
		DecR(operand) => inc_dec_r(cpu, operand, alu::dec),
		Rlca => rotate_a(cpu, alu::rlc(cpu.registers().get(Register::A) as u8)),
		Rrca => rotate_a(cpu, alu::rrc(cpu.registers().get(Register::A) as u8)),
		Rla => {
			let carry_in = cpu.registers().get_flag(Flag::C);
			rotate_a(cpu, alu::rl(cpu.registers().get(Register::A) as u8, carry_in));
		}
		Rra => {
			let carry_in = cpu.registers().get_flag(Flag::C);
			rotate_a(cpu, alu::rr(cpu.registers().get(Register::A) as u8, carry_in));
		}
		Daa => {
			let a = cpu.registers().get(Register::A) as u8;
			let f = cpu.registers();
			let result =
				alu::daa(a, f.get_flag(Flag::N), f.get_flag(Flag::H), f.get_flag(Flag::C));
			cpu.registers_mut().set(Register::A, result.value as u16);
			apply_flags(cpu, result.flags);
		}
		Cpl => {
			let a = cpu.registers().get(Register::A) as u8;
			cpu.registers_mut().set(Register::A, alu::cpl(a) as u16);
			cpu.registers_mut().set_flag(Flag::N, true);
			cpu.registers_mut().set_flag(Flag::H, true);
		}
		Scf => {
			cpu.registers_mut().set_flag(Flag::N, false);
			cpu.registers_mut().set_flag(Flag::H, false);
			cpu.registers_mut().set_flag(Flag::C, true);
		}
		Ccf => {
			let c = cpu.registers().get_flag(Flag::C);
			cpu.registers_mut().set_flag(Flag::N, false);
			cpu.registers_mut().set_flag(Flag::H, false);
			cpu.registers_mut().set_flag(Flag::C, !c);
		}

		JrImm => jr_imm(cpu, None),
		JrCondImm(cond) => jr_imm(cpu, Some(cond)),

		AluA(op, operand) => alu_a(cpu, op, operand),
		AluAImm(op) => alu_a_imm(cpu, op),

		RetCond(cond) => ret(cpu, Some(cond), false),
		Ret => ret(cpu, None, false),
		Reti => ret(cpu, None, true),
		JpHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.registers_mut().set(Register::PC, hl);
		}
		LdSpHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_internal_commit(Box::new(move |cpu| cpu.registers_mut().set(Register::SP, hl)));
		}
		LdhWriteA => ldh_write_a(cpu),
		AddSpImm => add_sp_imm(cpu),
		LdhReadA => ldh_read_a(cpu),
		LdHlSpImm => ld_hl_sp_imm(cpu),
		PopRp(rp) => pop(cpu, rp),
		PushRp(rp) => push(cpu, reg16_stack_of(rp)),
		JpCondImm(cond) => jp(cpu, Some(cond)),
		LdhWriteAC => {
			let a = cpu.registers().get(Register::A) as u8;
			let c = cpu.registers().get(Register::C);
			cpu.q_write(0xFF00 + c, a);
		}
		LdNnA => ld_nn_a(cpu),
		LdhReadAC => {
			let c = cpu.registers().get(Register::C);
			cpu.q_read_commit(
				0xFF00 + c,
				Box::new(|cpu| {
					let value = cpu.operand();
					cpu.registers_mut().set(Register::A, value as u16);
				}),
			);
		}
		LdANn => ld_a_nn(cpu),
		JpImm => jp(cpu, None),
		Di => cpu.ime = false,
		Ei => cpu.ime_pending = true,
		CallCondImm(cond) => call(cpu, Some(cond)),
		CallImm => call(cpu, None),
		Rst(target) => rst(cpu, target as u16),

		Rot(op, operand) => rot(cpu, op, operand),
		Bit(bit, operand) => bit(cpu, bit, operand),
		Res(bit, operand) => res_set(cpu, bit, operand, alu::res),
		Set(bit, operand) => res_set(cpu, bit, operand, alu::set),
	}

	Ok(())
}

fn ld_r_r(cpu: &mut Cpu, dst: Operand8, src: Operand8) {
	match (dst, src) {
		(Operand8::IndirectHl, src) => {
			let hl = cpu.registers().get(Register::HL);
			let value = read_operand8(cpu, src);
			cpu.q_write(hl, value);
		}
		(dst, Operand8::IndirectHl) => {
			let hl = cpu.registers().get(Register::HL);
			let dst_reg = reg_of(dst);
			cpu.q_read_commit(
				hl,
				Box::new(move |cpu| {
					let value = cpu.operand();
					cpu.registers_mut().set(dst_reg, value as u16);
				}),
			);
		}
		(dst, src) => {
			let value = cpu.registers().get(reg_of(src));
			cpu.registers_mut().set(reg_of(dst), value);
		}
	}
}

fn ld_r_imm(cpu: &mut Cpu, dst: Operand8) {
	let pc = cpu.advance_pc();
	match dst {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(
				pc,
				Box::new(move |cpu| {
					let value = cpu.operand();
					cpu.q_write(hl, value);
				}),
			);
		}
		dst => {
			let dst_reg = reg_of(dst);
			cpu.q_read_commit(
				pc,
				Box::new(move |cpu| {
					let value = cpu.operand();
					cpu.registers_mut().set(dst_reg, value as u16);
				}),
			);
		}
	}
}

fn ld_rp_imm(cpu: &mut Cpu, rp: Reg16) {
	let low_addr = cpu.advance_pc();
	let reg = reg16_of(rp);
	cpu.q_read_commit(
		low_addr,
		Box::new(move |cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					cpu.registers_mut().set(reg, u16::from_le_bytes([low, high]));
				}),
			);
		}),
	);
}

fn indirect_address(cpu: &mut Cpu, indirect: Indirect) -> u16 {
	match indirect {
		Indirect::Bc => cpu.registers().get(Register::BC),
		Indirect::De => cpu.registers().get(Register::DE),
		Indirect::HlInc => {
			let hl = cpu.registers().get(Register::HL);
			cpu.registers_mut().set(Register::HL, hl.wrapping_add(1));
			hl
		}
		Indirect::HlDec => {
			let hl = cpu.registers().get(Register::HL);
			cpu.registers_mut().set(Register::HL, hl.wrapping_sub(1));
			hl
		}
	}
}

fn ld_indirect_from_a(cpu: &mut Cpu, indirect: Indirect) {
	let address = indirect_address(cpu, indirect);
	let a = cpu.registers().get(Register::A) as u8;
	cpu.q_write(address, a);
}

fn ld_a_from_indirect(cpu: &mut Cpu, indirect: Indirect) {
	let address = indirect_address(cpu, indirect);
	cpu.q_read_commit(
		address,
		Box::new(|cpu| {
			let value = cpu.operand();
			cpu.registers_mut().set(Register::A, value as u16);
		}),
	);
}

fn ld_nn_sp(cpu: &mut Cpu) {
	let low_addr = cpu.advance_pc();
	cpu.q_read_commit(
		low_addr,
		Box::new(|cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					let sp = cpu.registers().get(Register::SP);
					cpu.q_write_commit(
						target,
						(sp & 0xFF) as u8,
						Box::new(move |cpu| cpu.q_write(target.wrapping_add(1), (sp >> 8) as u8)),
					);
				}),
			);
		}),
	);
}

fn add_hl_rp(cpu: &mut Cpu, rp: Reg16) {
	let hl = cpu.registers().get(Register::HL);
	let operand = cpu.registers().get(reg16_of(rp));
	let (value, flags) = alu::add16(hl, operand);
	cpu.q_internal_commit(Box::new(move |cpu| {
		cpu.registers_mut().set(Register::HL, value);
		let z = cpu.registers().get_flag(Flag::Z);
		apply_flags(cpu, flags);
		cpu.registers_mut().set_flag(Flag::Z, z);
	}));
}

fn inc_dec_rp(cpu: &mut Cpu, rp: Reg16, delta: i16) {
	let reg = reg16_of(rp);
	let value = cpu.registers().get(reg);
	cpu.q_internal_commit(Box::new(move |cpu| {
		cpu.registers_mut().set(reg, value.wrapping_add(delta as u16));
	}));
}

fn inc_dec_r(cpu: &mut Cpu, operand: Operand8, op: fn(u8) -> alu::AluResult) {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(
				hl,
				Box::new(move |cpu| {
					let result = op(cpu.operand());
					let c = cpu.registers().get_flag(Flag::C);
					cpu.q_write_commit(
						hl,
						result.value,
						Box::new(move |cpu| {
							apply_flags(cpu, result.flags);
							cpu.registers_mut().set_flag(Flag::C, c);
						}),
					);
				}),
			);
		}
		operand => {
			let reg = reg_of(operand);
			let result = op(cpu.registers().get(reg) as u8);
			cpu.registers_mut().set(reg, result.value as u16);
			let c = cpu.registers().get_flag(Flag::C);
			apply_flags(cpu, result.flags);
			cpu.registers_mut().set_flag(Flag::C, c);
		}
	}
}

fn rotate_a(cpu: &mut Cpu, result: alu::AluResult) {
	cpu.registers_mut().set(Register::A, result.value as u16);
	apply_flags(cpu, result.flags);
	cpu.registers_mut().set_flag(Flag::Z, false);
}

fn jr_imm(cpu: &mut Cpu, cond: Option<Condition>) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(
		pc,
		Box::new(move |cpu| {
			let offset = cpu.operand() as i8;
			if cond.map_or(true, |cond| cond_holds(cpu, cond)) {
				let target = cpu.registers().get(Register::PC).wrapping_add(offset as i16 as u16);
				cpu.q_internal_commit(Box::new(move |cpu| cpu.registers_mut().set(Register::PC, target)));
			}
		}),
	);
}

fn apply_alu(cpu: &mut Cpu, op: AluOp, operand: u8) {
	let a = cpu.registers().get(Register::A) as u8;
	let carry_in = cpu.registers().get_flag(Flag::C);
	let result = match op {
		AluOp::Add => alu::add(a, operand, false),
		AluOp::Adc => alu::add(a, operand, carry_in),
		AluOp::Sub => alu::sub(a, operand, false),
		AluOp::Sbc => alu::sub(a, operand, carry_in),
		AluOp::And => alu::and(a, operand),
		AluOp::Or => alu::or(a, operand),
		AluOp::Xor => alu::xor(a, operand),
		AluOp::Cp => alu::sub(a, operand, false),
	};
	if !matches!(op, AluOp::Cp) {
		cpu.registers_mut().set(Register::A, result.value as u16);
	}
	apply_flags(cpu, result.flags);
}

fn alu_a(cpu: &mut Cpu, op: AluOp, operand: Operand8) {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(hl, Box::new(move |cpu| apply_alu(cpu, op, cpu.operand())));
		}
		operand => {
			let value = read_operand8(cpu, operand);
			apply_alu(cpu, op, value);
		}
	}
}

fn alu_a_imm(cpu: &mut Cpu, op: AluOp) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(pc, Box::new(move |cpu| apply_alu(cpu, op, cpu.operand())));
}

fn push(cpu: &mut Cpu, reg: Register) {
	let value = cpu.registers().get(reg);
	cpu.q_internal_commit(Box::new(move |cpu| {
		let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
		cpu.registers_mut().set(Register::SP, sp);
		cpu.q_write_commit(
			sp,
			(value >> 8) as u8,
			Box::new(move |cpu| {
				let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
				cpu.registers_mut().set(Register::SP, sp);
				cpu.q_write(sp, (value & 0xFF) as u8);
			}),
		);
	}));
}

fn pop(cpu: &mut Cpu, rp: Reg16Stack) {
	let sp = cpu.registers().get(Register::SP);
	cpu.registers_mut().set(Register::SP, sp.wrapping_add(1));
	cpu.q_read_commit(
		sp,
		Box::new(move |cpu| {
			let low = cpu.operand();
			let sp = cpu.registers().get(Register::SP);
			cpu.registers_mut().set(Register::SP, sp.wrapping_add(1));
			cpu.q_read_commit(
				sp,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let value = u16::from_le_bytes([low, high]);
					let value = if rp == Reg16Stack::Af { value & 0xFFF0 } else { value };
					cpu.registers_mut().set(reg16_stack_of(rp), value);
				}),
			);
		}),
	);
}

fn jp(cpu: &mut Cpu, cond: Option<Condition>) {
	let low_addr = cpu.advance_pc();
	cpu.q_read_commit(
		low_addr,
		Box::new(move |cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					if cond.map_or(true, |cond| cond_holds(cpu, cond)) {
						cpu.q_internal_commit(Box::new(move |cpu| {
							cpu.registers_mut().set(Register::PC, target);
						}));
					}
				}),
			);
		}),
	);
}

fn call(cpu: &mut Cpu, cond: Option<Condition>) {
	let low_addr = cpu.advance_pc();
	cpu.q_read_commit(
		low_addr,
		Box::new(move |cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					if cond.map_or(true, |cond| cond_holds(cpu, cond)) {
						let return_address = cpu.registers().get(Register::PC);
						cpu.q_internal_commit(Box::new(move |cpu| {
							let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
							cpu.registers_mut().set(Register::SP, sp);
							cpu.q_write_commit(
								sp,
								(return_address >> 8) as u8,
								Box::new(move |cpu| {
									let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
									cpu.registers_mut().set(Register::SP, sp);
									cpu.q_write_commit(
										sp,
										(return_address & 0xFF) as u8,
										Box::new(move |cpu| {
											cpu.registers_mut().set(Register::PC, target);
										}),
									);
								}),
							);
						}));
					}
				}),
			);
		}),
	);
}

fn rst(cpu: &mut Cpu, target: u16) {
	let return_address = cpu.registers().get(Register::PC);
	cpu.q_internal_commit(Box::new(move |cpu| {
		let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
		cpu.registers_mut().set(Register::SP, sp);
		cpu.q_write_commit(
			sp,
			(return_address >> 8) as u8,
			Box::new(move |cpu| {
				let sp = cpu.registers().get(Register::SP).wrapping_sub(1);
				cpu.registers_mut().set(Register::SP, sp);
				cpu.q_write_commit(
					sp,
					(return_address & 0xFF) as u8,
					Box::new(move |cpu| cpu.registers_mut().set(Register::PC, target)),
				);
			}),
		);
	}));
}

fn ret(cpu: &mut Cpu, cond: Option<Condition>, enable_ime: bool) {
	if let Some(cond) = cond {
		// The conditional form spends one extra internal cycle testing
		// the flag before it even starts popping the return address.
		let holds = cond_holds(cpu, cond);
		cpu.q_internal_commit(Box::new(move |cpu| {
			if holds {
				ret_pop_and_jump(cpu, enable_ime);
			}
		}));
	} else {
		ret_pop_and_jump(cpu, enable_ime);
	}
}

fn ret_pop_and_jump(cpu: &mut Cpu, enable_ime: bool) {
	let sp = cpu.registers().get(Register::SP);
	cpu.registers_mut().set(Register::SP, sp.wrapping_add(1));
	cpu.q_read_commit(
		sp,
		Box::new(move |cpu| {
			let low = cpu.operand();
			let sp = cpu.registers().get(Register::SP);
			cpu.registers_mut().set(Register::SP, sp.wrapping_add(1));
			cpu.q_read_commit(
				sp,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					cpu.q_internal_commit(Box::new(move |cpu| {
						cpu.registers_mut().set(Register::PC, target);
						if enable_ime {
							cpu.ime = true;
						}
					}));
				}),
			);
		}),
	);
}

fn ldh_write_a(cpu: &mut Cpu) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(
		pc,
		Box::new(|cpu| {
			let offset = cpu.operand();
			let a = cpu.registers().get(Register::A) as u8;
			cpu.q_write(0xFF00 + offset as u16, a);
		}),
	);
}

fn ldh_read_a(cpu: &mut Cpu) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(
		pc,
		Box::new(|cpu| {
			let offset = cpu.operand();
			cpu.q_read_commit(
				0xFF00 + offset as u16,
				Box::new(|cpu| {
					let value = cpu.operand();
					cpu.registers_mut().set(Register::A, value as u16);
				}),
			);
		}),
	);
}

fn ld_nn_a(cpu: &mut Cpu) {
	let low_addr = cpu.advance_pc();
	cpu.q_read_commit(
		low_addr,
		Box::new(|cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					let a = cpu.registers().get(Register::A) as u8;
					cpu.q_write(target, a);
				}),
			);
		}),
	);
}

fn ld_a_nn(cpu: &mut Cpu) {
	let low_addr = cpu.advance_pc();
	cpu.q_read_commit(
		low_addr,
		Box::new(|cpu| {
			let low = cpu.operand();
			let high_addr = cpu.advance_pc();
			cpu.q_read_commit(
				high_addr,
				Box::new(move |cpu| {
					let high = cpu.operand();
					let target = u16::from_le_bytes([low, high]);
					cpu.q_read_commit(
						target,
						Box::new(|cpu| {
							let value = cpu.operand();
							cpu.registers_mut().set(Register::A, value as u16);
						}),
					);
				}),
			);
		}),
	);
}

fn add_sp_imm(cpu: &mut Cpu) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(
		pc,
		Box::new(|cpu| {
			let offset = cpu.operand() as i8;
			let sp = cpu.registers().get(Register::SP);
			let (value, flags) = alu::add16_signed(sp, offset);
			cpu.q_internal_commit(Box::new(move |cpu| {
				cpu.q_internal_commit(Box::new(move |cpu| {
					cpu.registers_mut().set(Register::SP, value);
					apply_flags(cpu, flags);
				}));
			}));
		}),
	);
}

fn ld_hl_sp_imm(cpu: &mut Cpu) {
	let pc = cpu.advance_pc();
	cpu.q_read_commit(
		pc,
		Box::new(|cpu| {
			let offset = cpu.operand() as i8;
			let sp = cpu.registers().get(Register::SP);
			let (value, flags) = alu::add16_signed(sp, offset);
			cpu.q_internal_commit(Box::new(move |cpu| {
				cpu.registers_mut().set(Register::HL, value);
				apply_flags(cpu, flags);
			}));
		}),
	);
}

fn apply_rot(op: RotOp, value: u8, carry_in: bool) -> alu::AluResult {
	match op {
		RotOp::Rlc => alu::rlc(value),
		RotOp::Rrc => alu::rrc(value),
		RotOp::Rl => alu::rl(value, carry_in),
		RotOp::Rr => alu::rr(value, carry_in),
		RotOp::Sla => alu::sla(value),
		RotOp::Sra => alu::sra(value),
		RotOp::Swap => alu::swap(value),
		RotOp::Srl => alu::srl(value),
	}
}

fn rot(cpu: &mut Cpu, op: RotOp, operand: Operand8) {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(
				hl,
				Box::new(move |cpu| {
					let carry_in = cpu.registers().get_flag(Flag::C);
					let result = apply_rot(op, cpu.operand(), carry_in);
					cpu.q_write_commit(hl, result.value, Box::new(move |cpu| apply_flags(cpu, result.flags)));
				}),
			);
		}
		operand => {
			let reg = reg_of(operand);
			let carry_in = cpu.registers().get_flag(Flag::C);
			let result = apply_rot(op, cpu.registers().get(reg) as u8, carry_in);
			cpu.registers_mut().set(reg, result.value as u16);
			apply_flags(cpu, result.flags);
		}
	}
}

fn bit(cpu: &mut Cpu, n: u8, operand: Operand8) {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(
				hl,
				Box::new(move |cpu| {
					let flags = alu::bit_test(cpu.operand(), n);
					let c = cpu.registers().get_flag(Flag::C);
					apply_flags(cpu, flags);
					cpu.registers_mut().set_flag(Flag::C, c);
				}),
			);
		}
		operand => {
			let value = read_operand8(cpu, operand);
			let flags = alu::bit_test(value, n);
			let c = cpu.registers().get_flag(Flag::C);
			apply_flags(cpu, flags);
			cpu.registers_mut().set_flag(Flag::C, c);
		}
	}
}

fn res_set(cpu: &mut Cpu, n: u8, operand: Operand8, op: fn(u8, u8) -> u8) {
	match operand {
		Operand8::IndirectHl => {
			let hl = cpu.registers().get(Register::HL);
			cpu.q_read_commit(
				hl,
				Box::new(move |cpu| {
					let value = op(cpu.operand(), n);
					cpu.q_write(hl, value);
				}),
			);
		}
		operand => {
			let reg = reg_of(operand);
			let value = op(cpu.registers().get(reg) as u8, n);
			cpu.registers_mut().set(reg, value as u16);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::cartridge::Cartridge;

	fn run(program: &[u8]) -> Cpu {
		let mut rom = alloc::vec![0u8; 0x8000];
		rom[0x100..0x100 + program.len()].copy_from_slice(program);
		let cartridge = Cartridge::new(rom.into_boxed_slice()).expect("flat ROM cartridge");
		let mut cpu = Cpu::new(cartridge);
		for _ in 0..program.len() * 8 {
			cpu.tick().unwrap();
		}
		cpu
	}

	#[test]
	fn ld_b_imm_loads_the_immediate_byte() {
		let cpu = run(&[0x06, 0x42]); // LD B,0x42
		assert_eq!(cpu.registers().get(Register::B), 0x42);
	}

	#[test]
	fn push_bc_then_pop_de_round_trips_through_the_stack() {
		let cpu = run(&[
			0x01, 0x34, 0x12, // LD BC,0x1234
			0xC5, // PUSH BC
			0xD1, // POP DE
		]);
		assert_eq!(cpu.registers().get(Register::DE), 0x1234);
	}

	#[test]
	fn pop_af_masks_the_low_nibble_of_f() {
		let mut rom = alloc::vec![0u8; 0x8000];
		let program: &[u8] = &[
			0x31, 0x00, 0xD0, // LD SP,0xD000
			0x3E, 0xFF, // LD A,0xFF
			0xF5, // PUSH AF
			0x00, 0x00, // padding
			0xF1, // POP AF
		];
		rom[0x100..0x100 + program.len()].copy_from_slice(program);
		let cartridge = Cartridge::new(rom.into_boxed_slice()).expect("flat ROM cartridge");
		let mut cpu = Cpu::new(cartridge);

		// LD SP,nn (3) + LD A,n (2) + PUSH AF (4) = 9 ticks to finish the push.
		for _ in 0..9 {
			cpu.tick().unwrap();
		}

		// Poke the pushed low byte with garbage low-nibble bits a real F
		// could never hold, confirming POP AF still comes back clean.
		let sp = cpu.registers().get(Register::SP);
		cpu.mmap.write(sp, 0x0F).unwrap();

		// Two NOPs (2) + POP AF (3) = 5 more ticks.
		for _ in 0..5 {
			cpu.tick().unwrap();
		}
		assert_eq!(cpu.registers().get(Register::F) & 0x0F, 0);
	}

	#[test]
	fn call_then_ret_returns_to_the_instruction_after_the_call() {
		let mut rom = alloc::vec![0u8; 0x8000];
		let program: &[u8] = &[
			0x31, 0xFE, 0xFF, // LD SP,0xFFFE
			0xCD, 0x08, 0x01, // CALL 0x0108
			0x00, // NOP (return address)
			0x00, // padding so 0x0108 is reachable
			0xC9, // RET
		];
		rom[0x100..0x100 + program.len()].copy_from_slice(program);
		let cartridge = Cartridge::new(rom.into_boxed_slice()).expect("flat ROM cartridge");
		let mut cpu = Cpu::new(cartridge);

		// LD SP,nn (3) + CALL nn taken (6) + RET (4) = 13 ticks; stop there,
		// before the loop of NOPs past the return address runs RET again.
		for _ in 0..13 {
			cpu.tick().unwrap();
		}
		assert_eq!(cpu.registers().get(Register::PC), 0x0106);
	}

	#[test]
	fn bit_7_on_zero_sets_the_zero_flag() {
		let cpu = run(&[
			0xAF, // XOR A (A = 0)
			0xCB, 0x7F, // BIT 7,A
		]);
		assert!(cpu.registers().get_flag(Flag::Z));
	}

	#[test]
	fn cb_res_and_set_on_indirect_hl_round_trip() {
		let cpu = run(&[
			0x21, 0x00, 0xC0, // LD HL,0xC000
			0x36, 0xFF, // LD (HL),0xFF
			0xCB, 0x86, // RES 0,(HL)
			0xCB, 0xC6, // SET 0,(HL)
		]);
		assert_eq!(cpu.mmap.peek(0xC000).unwrap(), 0xFF);
	}
}
