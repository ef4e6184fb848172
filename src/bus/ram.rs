// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The DMG's internal work RAM and high RAM.

use super::consts::*;
use super::memory_range::*;
use super::Memory;

use crate::GameboyError;

/// Work RAM (0xC000-0xDFFF, echoed at 0xE000-0xFDFF) and high RAM
/// (0xFF80-0xFFFE).
pub struct InternalRam {
	data: [u8; range_size!(MMAP_RAM_INTERNAL)],
	high_data: [u8; range_size!(MMAP_RAM_HIGH)],
}

impl InternalRam {
	/// Initialize zeroed work RAM and high RAM.
	pub fn new() -> Self {
		InternalRam {
			data: [0_u8; range_size!(MMAP_RAM_INTERNAL)],
			high_data: [0_u8; range_size!(MMAP_RAM_HIGH)],
		}
	}

	/// Zero both regions, matching the power-on state (contents are
	/// actually undefined on real hardware; zero is a convenient, stable
	/// stand-in for tests and for deterministic replay).
	pub fn reset(&mut self) {
		self.data = [0_u8; range_size!(MMAP_RAM_INTERNAL)];
		self.high_data = [0_u8; range_size!(MMAP_RAM_HIGH)];
	}

	/// Maps an address in either MMAP_RAM_INTERNAL or MMAP_RAM_ECHO onto an
	/// offset into `data`. The echo region is smaller than the region it
	/// mirrors, so this only aliases the first 0x1E00 bytes of work RAM,
	/// matching the real echo behavior.
	fn offset(&self, address: u16) -> usize {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) => address as usize - range_start!(MMAP_RAM_INTERNAL),
			memory_range!(MMAP_RAM_ECHO) => address as usize - range_start!(MMAP_RAM_ECHO),
			_ => unreachable!(),
		}
	}

	fn hram_offset(&self, address: u16) -> usize {
		match address {
			memory_range!(MMAP_RAM_HIGH) => address as usize - range_start!(MMAP_RAM_HIGH),
			_ => unreachable!(),
		}
	}
}

impl Default for InternalRam {
	fn default() -> Self {
		InternalRam::new()
	}
}

impl Memory for InternalRam {
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) | memory_range!(MMAP_RAM_ECHO) => {
				self.data[self.offset(address)] = value;
				Ok(())
			}
			memory_range!(MMAP_RAM_HIGH) => {
				self.high_data[self.hram_offset(address)] = value;
				Ok(())
			}
			_ => Err(GameboyError::BadAddress(address)),
		}
	}

	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) | memory_range!(MMAP_RAM_ECHO) => {
				Ok(self.data[self.offset(address)])
			}
			memory_range!(MMAP_RAM_HIGH) => Ok(self.high_data[self.hram_offset(address)]),
			_ => Err(GameboyError::BadAddress(address)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn echo_region_mirrors_internal_ram() {
		let mut ram = InternalRam::new();
		ram.write(0xC010, 0x42).unwrap();
		assert_eq!(ram.read(0xE010).unwrap(), 0x42);

		ram.write(0xE020, 0x7).unwrap();
		assert_eq!(ram.read(0xC020).unwrap(), 0x7);
	}

	#[test]
	fn high_ram_is_independent_of_work_ram() {
		let mut ram = InternalRam::new();
		ram.write(0xFF80, 1).unwrap();
		ram.write(0xFFFE, 2).unwrap();
		assert_eq!(ram.read(0xFF80).unwrap(), 1);
		assert_eq!(ram.read(0xFFFE).unwrap(), 2);
		assert_eq!(ram.read(0xC000).unwrap(), 0);
	}
}
