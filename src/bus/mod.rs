// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! The address bus: memory-mapped region dispatch, OAM DMA, and the
//! interrupt register pair every peripheral feeds into.

#[macro_use]
pub mod memory_range;
pub mod cartridge;
pub mod io;
pub mod joypad;
pub mod ppu;
pub mod ram;
pub mod timer;

use cartridge::*;
use io::*;
use joypad::*;
use memory_range::*;
use ppu::*;
use ram::*;
use timer::*;
use timer::consts::MMAP_IO_TIMER;
use ppu::consts::MMAP_IO_DISPLAY;

use crate::interrupts::*;
use crate::renderer::Renderer;
use crate::GameboyError;

/// Bus locations-related constants.
#[allow(missing_docs)]
pub mod consts {
	use super::*;

	pub const MMAP_ROM_BANK0: MemoryRange = make_range!(0x0000, 0x3FFF);
	pub const MMAP_ROM_BANK_SW: MemoryRange = make_range!(0x4000, 0x7FFF);
	pub const MMAP_VIDEO_RAM: MemoryRange = make_range!(0x8000, 0x9FFF);
	pub const MMAP_RAM_BANK_SW: MemoryRange = make_range!(0xA000, 0xBFFF);
	pub const MMAP_RAM_INTERNAL: MemoryRange = make_range!(0xC000, 0xDFFF);
	/// Maps to the same physical memory as the internal ram.
	pub const MMAP_RAM_ECHO: MemoryRange = make_range!(0xE000, 0xFDFF);
	/// Sprite/Object attribute memory.
	pub const MMAP_SPRITE_OAM: MemoryRange = make_range!(0xFE00, 0xFE9F);
	/// Unusable OAM shadow; reads as 0xFF, writes are dropped.
	pub const MMAP_FORBIDDEN: MemoryRange = make_range!(0xFEA0, 0xFEFF);
	pub const MMAP_IO_PORTS: MemoryRange = make_range!(0xFF00, 0xFF7F);
	/// High RAM; the only region a running OAM DMA transfer leaves
	/// reachable to the CPU.
	pub const MMAP_RAM_HIGH: MemoryRange = make_range!(0xFF80, 0xFFFE);

	pub const IO_P1: u16 = 0xFF00;
	pub const IO_DMA: u16 = 0xFF46;
	pub const IO_IF: u16 = 0xFF0F;
	pub const IO_IE: u16 = 0xFFFF;
}

use consts::*;

/// A peripheral that can be written and read by the cpu.
pub trait Memory {
	/// Write a 8-bit value to the peripheral.
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError>;

	/// Read a 8-bit value from this peripheral.
	fn read(&self, address: u16) -> Result<u8, GameboyError>;
}

/// Observes every bus access that goes through [`SystemBus::write`] /
/// [`SystemBus::read`] (not DMA's own internal copy, and not
/// [`SystemBus::peek`]). Intended for host-side tooling (memory
/// breakpoints); the core itself never installs one.
pub trait MemoryObserver {
	/// Called after a value has been read from `address`.
	fn on_read(&mut self, address: u16, value: u8);
	/// Called after `value` has been written to `address`.
	fn on_write(&mut self, address: u16, value: u8);
}

/// The OAM DMA transfer state machine: one byte copied per machine cycle,
/// over 160 cycles, exactly as the real hardware paces it.
#[derive(Debug, Default, Clone, Copy)]
struct Dma {
	source: u16,
	progress: u16,
	active: bool,
}

impl Dma {
	fn start(&mut self, high_byte: u8) {
		self.source = (high_byte as u16) << 8;
		self.progress = 0;
		self.active = true;
	}

	fn blocks_cpu_access(&self, address: u16) -> bool {
		self.active && !matches!(address, memory_range!(MMAP_RAM_HIGH))
	}
}

/// A virtual representation of the Game Boy's memory bus.
pub struct SystemBus {
	pub(crate) cartridge: Cartridge,
	pub(crate) ppu: Ppu,
	pub(crate) io: IoPorts,
	pub(crate) timer: Timer,
	pub(crate) joypad: Joypad,
	pub(crate) ram: InternalRam,

	interrupts: InterruptRegister,
	dma: Dma,
	observer: Option<alloc::boxed::Box<dyn MemoryObserver>>,
}

/// An abstraction for fetching mutable and immutable regions.
macro_rules! get_region {
	($name:tt $(,$mut_:tt)*) => {
		/// Returns the peripheral that owns the given address.
		fn $name(&$($mut_)* self, address: u16) -> Result<&$($mut_)* dyn Memory, GameboyError> {
			match address {
				memory_range!(MMAP_ROM_BANK0) |
				memory_range!(MMAP_ROM_BANK_SW) |
				memory_range!(MMAP_RAM_BANK_SW) => {
					Ok(&$($mut_)* self.cartridge)
				}

				memory_range!(MMAP_RAM_INTERNAL) |
				memory_range!(MMAP_RAM_ECHO) |
				memory_range!(MMAP_RAM_HIGH) => {
					Ok(&$($mut_)* self.ram)
				}

				memory_range!(MMAP_IO_TIMER) => {
					Ok(&$($mut_)* self.timer)
				}

				memory_range!(MMAP_IO_DISPLAY) |
				memory_range!(MMAP_VIDEO_RAM) |
				memory_range!(MMAP_SPRITE_OAM) => {
					Ok(&$($mut_)* self.ppu)
				}

				IO_P1 => {
					Ok(&$($mut_)* self.joypad)
				}

				memory_range!(MMAP_IO_PORTS) => {
					Ok(&$($mut_)* self.io)
				}

				_ => Err(GameboyError::BadAddress(address)),
			}
		}
	}
}

impl SystemBus {
	/// Initialize a new address space around an already-loaded cartridge.
	pub fn new(cartridge: Cartridge) -> Self {
		SystemBus {
			cartridge,
			ppu: Ppu::new(),
			io: IoPorts::new(),
			timer: Timer::new(),
			joypad: Joypad::new(),
			ram: InternalRam::new(),
			interrupts: InterruptRegister::new(),
			dma: Dma::default(),
			observer: None,
		}
	}

	/// Installs a host-side observer to be notified after every
	/// [`SystemBus::read`] / [`SystemBus::write`]. Replaces any previously
	/// installed observer.
	pub fn set_observer(&mut self, observer: alloc::boxed::Box<dyn MemoryObserver>) {
		self.observer = Some(observer);
	}

	/// Removes any installed observer.
	pub fn clear_observer(&mut self) {
		self.observer = None;
	}

	/// Reset every peripheral to its documented post-boot-ROM state.
	pub fn reset(&mut self) {
		self.ppu.reset();
		self.io.reset();
		self.timer.reset();
		self.joypad.reset();
		self.ram.reset();
		self.interrupts.reset();
		self.dma = Dma::default();
	}

	/// Advance every peripheral and the DMA transfer by `cycles` T-cycles,
	/// collecting freshly latched interrupts into IF.
	pub fn process(&mut self, cycles: usize, renderer: &mut dyn Renderer) {
		self.ppu.process(cycles, renderer);
		self.timer.process(cycles);
		self.advance_dma(cycles);

		self.interrupts.raise_mask(self.ppu.interrupts());
		self.interrupts.raise_mask(self.timer.interrupts());
		self.interrupts.raise_mask(self.joypad.interrupts());
		self.interrupts.raise_mask(self.io.interrupts());

		self.ppu.clear();
		self.timer.clear();
		self.joypad.clear();
		self.io.clear();
	}

	/// A host calls this once per polled frame to reflect its own input
	/// state into the emulated matrix.
	pub fn joypad_mut(&mut self) -> &mut Joypad {
		&mut self.joypad
	}

	/// Drain everything shifted out over the serial port so far.
	pub fn take_serial_output(&mut self) -> alloc::vec::Vec<u8> {
		self.io.take_serial_output()
	}

	/// One byte of the DMA transfer completes per machine cycle (4
	/// T-cycles); `cycles` may batch several at once.
	fn advance_dma(&mut self, cycles: usize) {
		if !self.dma.active {
			return;
		}
		let mut remaining = cycles / 4;
		while remaining > 0 && self.dma.active {
			let byte = self.raw_read(self.dma.source + self.dma.progress).unwrap_or(0xFF);
			let _ = self.ppu.write(0xFE00 + self.dma.progress, byte);
			self.dma.progress += 1;
			if self.dma.progress == 0xA0 {
				self.dma.active = false;
			}
			remaining -= 1;
		}
	}

	/// A read that is never blocked by an in-flight DMA transfer; used
	/// only by the DMA transfer itself to fetch its source bytes.
	fn raw_read(&self, address: u16) -> Result<u8, GameboyError> {
		match address {
			IO_IE => Ok(self.interrupts.read_enable()),
			IO_IF => Ok(self.interrupts.read_pending()),
			IO_DMA => Ok((self.dma.source >> 8) as u8),
			memory_range!(MMAP_FORBIDDEN) => Ok(0xFF),
			_ => self.region(address)?.read(address),
		}
	}

	/// Write a value as the CPU would: blocked outside high RAM while a
	/// DMA transfer is in flight.
	pub fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		if self.dma.blocks_cpu_access(address) {
			return Ok(());
		}

		match address {
			IO_IE => self.interrupts.write_enable(value),
			IO_IF => self.interrupts.write_pending(value),
			IO_DMA => self.dma.start(value),
			memory_range!(MMAP_FORBIDDEN) => {}
			_ => self.region_mut(address)?.write(address, value)?,
		}

		if let Some(observer) = &mut self.observer {
			observer.on_write(address, value);
		}

		Ok(())
	}

	/// Read a value as the CPU would: blocked outside high RAM while a
	/// DMA transfer is in flight (returns 0xFF, matching open-bus reads).
	pub fn read(&mut self, address: u16) -> Result<u8, GameboyError> {
		let value = if self.dma.blocks_cpu_access(address) {
			0xFF
		} else {
			self.raw_read(address)?
		};

		if let Some(observer) = &mut self.observer {
			observer.on_read(address, value);
		}

		Ok(value)
	}

	/// Read a value without any of `read`'s side effects or DMA gating.
	/// Safe for a debugger or disassembler to call at any time; never
	/// masks unmapped I/O the way `read` might for padding bits.
	pub fn peek(&self, address: u16) -> Result<u8, GameboyError> {
		self.raw_read(address)
	}

	/// The interrupt controller's pending+enabled mask.
	pub fn pending_interrupts(&self) -> InterruptMask {
		self.interrupts.pending()
	}

	/// True if any enabled interrupt is pending, regardless of IME (used
	/// to wake the CPU from HALT).
	pub fn any_interrupt_pending(&self) -> bool {
		self.interrupts.any_pending()
	}

	/// Pop the highest-priority pending+enabled interrupt for servicing.
	pub fn take_interrupt(&mut self) -> Option<InterruptKind> {
		self.interrupts.take_pending()
	}

	// Get an immutable region.
	get_region!(region);

	// Get a mutable region.
	get_region!(region_mut, mut);
}

#[cfg(test)]
impl SystemBus {
	/// Writes the complete array's bytes to the relevant memory region.
	pub fn write_all(&mut self, address: u16, array: &[u8]) -> Result<(), GameboyError> {
		for (index, value) in array.iter().enumerate() {
			self.write(address + (index as u16), *value)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::renderer::NullRenderer;
	use alloc::vec;

	fn test_bus() -> SystemBus {
		let mut rom = vec![0_u8; 0x8000];
		rom[cartridge::consts::ROM_CARTRIDGE_TYPE] = 0;
		let cartridge = Cartridge::new(rom.into_boxed_slice()).unwrap();
		SystemBus::new(cartridge)
	}

	#[test]
	fn memory_ranges_resolve_to_the_right_peripheral() {
		let bus = test_bus();

		assert!(bus.region(0xA100).is_ok());
		assert!(bus.region(0x2000).is_ok());
		assert!(bus.region(0xFFFF).is_err()); // IE is handled above region dispatch
	}

	#[test]
	fn work_ram_round_trips_through_the_bus() {
		let mut bus = test_bus();
		bus.write(0xC010, 0x5A).unwrap();
		assert_eq!(bus.read(0xC010).unwrap(), 0x5A);
	}

	#[test]
	fn dma_copies_160_bytes_into_oam_over_160_cycles() {
		let mut bus = test_bus();
		let mut renderer = NullRenderer;
		for i in 0..0xA0u16 {
			bus.write(0xC000 + i, i as u8 + 1).unwrap();
		}

		bus.write(IO_DMA, 0xC0).unwrap();
		// 160 bytes at one per machine cycle (4 T-cycles each).
		bus.process(0xA0 * 4, &mut renderer);

		for i in 0..0xA0u16 {
			assert_eq!(bus.peek(0xFE00 + i).unwrap(), i as u8 + 1);
		}
	}

	#[test]
	fn dma_in_flight_blocks_cpu_access_outside_high_ram() {
		let mut bus = test_bus();
		let mut renderer = NullRenderer;
		bus.write(0xC000, 0x11).unwrap();
		bus.write(IO_DMA, 0xC0).unwrap();

		// Not yet finished: a CPU read of work RAM sees an open-bus value.
		bus.process(4, &mut renderer);
		assert_eq!(bus.read(0xC000).unwrap(), 0xFF);

		// High RAM stays reachable throughout.
		bus.write(0xFF80, 0x22).unwrap();
		assert_eq!(bus.read(0xFF80).unwrap(), 0x22);
	}

	#[test]
	fn ie_register_upper_bits_always_read_as_one() {
		let mut bus = test_bus();
		bus.write(IO_IE, 0x00).unwrap();
		assert_eq!(bus.read(IO_IE).unwrap(), 0xE0);
	}

	#[test]
	fn forbidden_range_reads_0xff_and_drops_writes() {
		let mut bus = test_bus();
		bus.write(0xFEA0, 0x42).unwrap();
		assert_eq!(bus.read(0xFEA0).unwrap(), 0xFF);
		assert_eq!(bus.read(0xFEFF).unwrap(), 0xFF);
	}

	/// Shares its log with the test that installed it, so the assertions
	/// can run after the bus has taken ownership of the boxed observer.
	#[derive(Clone, Default)]
	struct RecordingObserver {
		log: alloc::rc::Rc<core::cell::RefCell<alloc::vec::Vec<(bool, u16, u8)>>>,
	}

	impl MemoryObserver for RecordingObserver {
		fn on_read(&mut self, address: u16, value: u8) {
			self.log.borrow_mut().push((true, address, value));
		}
		fn on_write(&mut self, address: u16, value: u8) {
			self.log.borrow_mut().push((false, address, value));
		}
	}

	#[test]
	fn observer_sees_every_read_and_write_but_never_a_peek() {
		let mut bus = test_bus();
		let observer = RecordingObserver::default();
		bus.set_observer(alloc::boxed::Box::new(observer.clone()));

		bus.write(0xC010, 0x5A).unwrap();
		bus.read(0xC010).unwrap();
		bus.peek(0xC010).unwrap();

		assert_eq!(*observer.log.borrow(), alloc::vec![(false, 0xC010, 0x5A), (true, 0xC010, 0x5A)]);

		bus.clear_observer();
		bus.write(0xC010, 0x00).unwrap();
		assert_eq!(observer.log.borrow().len(), 2, "no notifications after the observer is cleared");
	}
}
