// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! The emulation library's front-end API.
//!
//! A host loads a [`Cartridge`], builds an [`Emulator`] around it, and
//! calls [`Emulator::tick`] once per machine cycle, feeding it whatever
//! [`Renderer`] it wants pixels delivered to.

use crate::bus::cartridge::Cartridge;
use crate::bus::joypad::Controller;
use crate::cpu::Cpu;
use crate::renderer::Renderer;
use crate::GameboyError;

/// The complete emulator: CPU, bus and every peripheral hanging off it.
pub struct Emulator {
	/// The Game Boy's processor, bus and peripherals.
	pub cpu: Cpu,
}

impl Emulator {
	/// Builds an emulator around `cartridge`, at the documented DMG
	/// post-boot-ROM state.
	pub fn new(cartridge: Cartridge) -> Self {
		Emulator { cpu: Cpu::new(cartridge) }
	}

	/// Resets to the documented post-boot-ROM state.
	pub fn reset(&mut self) {
		self.cpu.reset();
	}

	/// Advances the whole machine by one machine cycle: the CPU, and
	/// every peripheral sharing its bus, in lockstep.
	pub fn tick(&mut self, renderer: &mut dyn Renderer) -> Result<(), GameboyError> {
		self.cpu.mmap.process(1, renderer);
		self.cpu.tick()?;
		Ok(())
	}

	/// Applies a host's input snapshot to the emulated joypad matrix.
	pub fn with_controller<F>(&mut self, closure: F)
	where
		F: FnOnce(&mut dyn Controller),
	{
		closure(self.cpu.mmap.joypad_mut());
	}

	/// Drains whatever bytes the cartridge's program has written to the
	/// serial port since the last call (the blargg test-ROM sink).
	pub fn take_serial_output(&mut self) -> alloc::vec::Vec<u8> {
		self.cpu.mmap.take_serial_output()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::renderer::NullRenderer;

	fn test_emulator() -> Emulator {
		let rom = alloc::vec![0u8; 0x8000].into_boxed_slice();
		let cartridge = Cartridge::new(rom).expect("flat ROM cartridge");
		Emulator::new(cartridge)
	}

	#[test]
	fn a_tick_runs_the_cpu_and_the_bus_together() {
		let mut emulator = test_emulator();
		let mut renderer = NullRenderer;
		for _ in 0..4 {
			emulator.tick(&mut renderer).unwrap();
		}
		// A run of NOPs advances PC by one opcode byte per tick.
		assert_eq!(emulator.cpu.mmap.peek(0x0100).unwrap(), 0x00);
	}

	#[test]
	fn reset_restores_the_documented_boot_state() {
		let mut emulator = test_emulator();
		let mut renderer = NullRenderer;
		emulator.tick(&mut renderer).unwrap();
		emulator.reset();
		assert!(!emulator.cpu.is_halted());
	}
}
