// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! The Sharp SM83 CPU core.
//!
//! [`Cpu::tick`] advances the machine by exactly one M-cycle. An
//! instruction is never executed in one shot: decoding it pushes a
//! handful of [`QueuedOp`]s onto a bounded queue, and each call to
//! `tick` pops and runs at most one of them. An op's commit closure may
//! push further ops, so a CALL or a CB-prefixed `(HL)` operation grows
//! its own tail as it goes rather than needing its whole cycle count
//! precomputed up front.

pub mod alu;
pub mod decode;
mod instructions;
mod interrupts;
pub mod state;

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use state::registers::Register;
use state::CpuState;

use crate::bus::cartridge::Cartridge;
use crate::bus::SystemBus;
use crate::GameboyError;

/// The bus access (if any) a queued micro-op performs when it is popped.
enum BusOp {
	/// No memory access; an idle/internal cycle.
	None,
	/// A read whose result lands in [`Cpu::operand_latch`] before the
	/// op's commit closure runs.
	Read(u16),
	/// A write of `value` to `address`.
	Write(u16, u8),
}

/// One machine cycle's worth of work: a bus access, followed optionally
/// by a closure that reacts to it (and may itself queue more ops).
struct QueuedOp {
	bus: BusOp,
	commit: Option<Box<dyn FnOnce(&mut Cpu)>>,
}

/// No real instruction ever needs to queue more than this many ops;
/// the bound exists to catch a runaway builder during development.
const MAX_QUEUED_OPS: usize = 8;

/// The Sharp SM83 CPU: register file, interrupt state and the address
/// bus it drives.
pub struct Cpu {
	state: CpuState,
	/// The address bus this CPU is wired to.
	pub mmap: SystemBus,
	ime: bool,
	ime_pending: bool,
	halted: bool,
	halt_bug: bool,
	stopped: bool,
	awaiting_cb_opcode: bool,
	queue: VecDeque<QueuedOp>,
	operand_latch: u8,
}

impl Cpu {
	/// Builds a CPU wired to a fresh bus around `cartridge`, at the
	/// documented DMG post-boot-ROM state.
	pub fn new(cartridge: Cartridge) -> Self {
		let mut cpu = Cpu {
			state: CpuState::new(),
			mmap: SystemBus::new(cartridge),
			ime: false,
			ime_pending: false,
			halted: false,
			halt_bug: false,
			stopped: false,
			awaiting_cb_opcode: false,
			queue: VecDeque::with_capacity(MAX_QUEUED_OPS),
			operand_latch: 0,
		};
		cpu.reset();
		cpu
	}

	/// Resets CPU and bus state to the documented post-boot-ROM values.
	pub fn reset(&mut self) {
		self.state.reset();
		self.mmap.reset();
		self.ime = false;
		self.ime_pending = false;
		self.halted = false;
		self.halt_bug = false;
		self.stopped = false;
		self.awaiting_cb_opcode = false;
		self.queue.clear();
		self.operand_latch = 0;
	}

	/// Whether the CPU is currently halted (awaiting an interrupt).
	pub fn is_halted(&self) -> bool {
		self.halted
	}

	/// Whether the CPU is in STOP mode.
	pub fn is_stopped(&self) -> bool {
		self.stopped
	}

	fn registers(&self) -> &CpuState {
		&self.state
	}

	fn registers_mut(&mut self) -> &mut CpuState {
		&mut self.state
	}

	/// Reads the byte the most recently popped `Read` op latched.
	fn operand(&self) -> u8 {
		self.operand_latch
	}

	/// Fetches the byte at PC and advances PC, honoring a pending
	/// HALT-bug byte re-read.
	fn advance_pc(&mut self) -> u16 {
		let pc = self.state.get(Register::PC);
		if self.halt_bug {
			self.halt_bug = false;
		} else {
			self.state.set(Register::PC, pc.wrapping_add(1));
		}
		pc
	}

	fn push(&mut self, bus: BusOp, commit: Option<Box<dyn FnOnce(&mut Cpu)>>) {
		debug_assert!(self.queue.len() < MAX_QUEUED_OPS, "cpu micro-op queue overflow");
		self.queue.push_back(QueuedOp { bus, commit });
	}

	/// Queues a bare idle cycle.
	fn q_internal(&mut self) {
		self.push(BusOp::None, None);
	}

	/// Queues an idle cycle whose commit runs with no bus access, e.g.
	/// the internal cycles of CALL/PUSH/RET or an ISR entry.
	fn q_internal_commit(&mut self, commit: Box<dyn FnOnce(&mut Cpu)>) {
		self.push(BusOp::None, Some(commit));
	}

	/// Queues a read; the fetched byte is available via
	/// [`Cpu::operand`] when `commit` runs.
	fn q_read_commit(&mut self, address: u16, commit: Box<dyn FnOnce(&mut Cpu)>) {
		self.push(BusOp::Read(address), Some(commit));
	}

	/// Queues a write with no further reaction.
	fn q_write(&mut self, address: u16, value: u8) {
		self.push(BusOp::Write(address, value), None);
	}

	/// Queues a write followed by a commit, e.g. the low byte of a push
	/// that then decrements SP again or finishes the instruction.
	fn q_write_commit(&mut self, address: u16, value: u8, commit: Box<dyn FnOnce(&mut Cpu)>) {
		self.push(BusOp::Write(address, value), Some(commit));
	}

	fn run_queued(&mut self, op: QueuedOp) -> Result<(), GameboyError> {
		match op.bus {
			BusOp::None => {}
			BusOp::Read(address) => self.operand_latch = self.mmap.read(address)?,
			BusOp::Write(address, value) => self.mmap.write(address, value)?,
		}
		if let Some(commit) = op.commit {
			commit(self);
		}
		Ok(())
	}

	/// Advances the CPU by one machine cycle: drains one queued op if
	/// any is pending, otherwise handles HALT/STOP wake-up, interrupt
	/// dispatch, or fetches and begins dispatching the next opcode.
	pub fn tick(&mut self) -> Result<(), GameboyError> {
		if let Some(op) = self.queue.pop_front() {
			return self.run_queued(op);
		}

		if self.halted {
			if self.mmap.any_interrupt_pending() {
				self.halted = false;
			} else {
				return Ok(());
			}
		}

		if self.stopped {
			return Ok(());
		}

		if self.ime && self.mmap.any_interrupt_pending() {
			if let Some(kind) = self.mmap.take_interrupt() {
				self.ime = false;
				let return_address = self.state.get(Register::PC);
				interrupts::dispatch(self, kind, return_address);
				return Ok(());
			}
		}

		if self.awaiting_cb_opcode {
			self.awaiting_cb_opcode = false;
			let pc = self.advance_pc();
			let opcode = self.mmap.read(pc)?;
			let instr = decode::decode_cb(opcode);
			let ei_was_pending = self.ime_pending;
			let result = instructions::dispatch(self, instr);
			if ei_was_pending {
				self.apply_ime_delay();
			}
			return result;
		}

		let pc = self.advance_pc();
		let opcode = self.mmap.read(pc)?;
		if opcode == 0xCB {
			self.awaiting_cb_opcode = true;
			return Ok(());
		}

		let ei_was_pending = self.ime_pending;
		let result = match decode::check_illegal(decode::decode(opcode)) {
			Ok(instr) => instructions::dispatch(self, instr),
			Err(err) => {
				#[cfg(feature = "logging")]
				log::warn!("illegal opcode {:#04x} at {:#06x}", opcode, pc);
				Err(err)
			}
		};
		if ei_was_pending {
			self.apply_ime_delay();
		}
		result
	}

	/// Enables IME if EI's one-instruction delay has just elapsed. Called
	/// once the instruction immediately following EI has been dispatched,
	/// so that instruction itself cannot be preempted by the interrupt it
	/// just unmasked.
	fn apply_ime_delay(&mut self) {
		if self.ime_pending {
			self.ime_pending = false;
			self.ime = true;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::cartridge::Cartridge;

	/// ROM addresses are not writable through the bus (writes there drive
	/// the mapper, same as on real hardware), so a test program must be
	/// baked into the image before the cartridge is built.
	fn test_cpu(program: &[u8]) -> Cpu {
		let mut rom = alloc::vec![0u8; 0x8000];
		rom[0x100..0x100 + program.len()].copy_from_slice(program);
		let cartridge = Cartridge::new(rom.into_boxed_slice()).expect("flat ROM cartridge");
		Cpu::new(cartridge)
	}

	#[test]
	fn reset_reaches_documented_boot_state() {
		let cpu = test_cpu(&[]);
		assert_eq!(cpu.state.get(Register::PC), 0x0100);
		assert_eq!(cpu.state.get(Register::SP), 0xFFFE);
		assert!(!cpu.halted && !cpu.stopped && !cpu.ime);
	}

	#[test]
	fn nop_takes_exactly_one_tick() {
		let mut cpu = test_cpu(&[0x00]); // NOP
		cpu.tick().unwrap();
		assert!(cpu.queue.is_empty());
		assert_eq!(cpu.state.get(Register::PC), 0x0101);
	}

	#[test]
	fn push_bc_takes_four_ticks_and_writes_both_bytes() {
		let mut cpu = test_cpu(&[0xC5]); // PUSH BC
		cpu.state.set(Register::BC, 0xBEEF);
		for _ in 0..4 {
			cpu.tick().unwrap();
		}
		assert!(cpu.queue.is_empty());
		let sp = cpu.state.get(Register::SP);
		assert_eq!(sp, 0xFFFC);
		assert_eq!(cpu.mmap.read(sp).unwrap(), 0xEF);
		assert_eq!(cpu.mmap.read(sp + 1).unwrap(), 0xBE);
	}

	#[test]
	fn ei_does_not_enable_interrupts_until_after_the_next_instruction() {
		let mut cpu = test_cpu(&[0xFB, 0x00, 0x00]); // EI; NOP; NOP
		cpu.mmap.write(0xFFFF, 0x01).unwrap(); // IE: VBlank enabled
		cpu.mmap.write(0xFF0F, 0x01).unwrap(); // IF: VBlank pending

		cpu.tick().unwrap(); // EI executes; ime still false
		assert!(!cpu.ime);

		cpu.tick().unwrap(); // fetch+dispatch the NOP right after EI
		assert!(cpu.ime, "ime should be enabled once the EI-shadowed instruction dispatches");
		assert_eq!(cpu.state.get(Register::PC), 0x0102, "the NOP must run, not be preempted");

		// The interrupt is now eligible: the next tick dispatches it
		// instead of fetching the second NOP.
		cpu.tick().unwrap();
		assert_eq!(cpu.state.get(Register::PC), 0x0102, "PC parked mid-ISR entry, not advanced past the NOP");
		assert!(!cpu.ime, "IME is cleared on ISR entry");
	}
}
