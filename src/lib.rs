// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
//! Cycle-accurate emulation of the Nintendo Game Boy (DMG): its Sharp SM83
//! processor, address bus, pixel-processing unit, timer/divider block and
//! interrupt controller, as described in the publicly available "Game Boy
//! CPU Manual" and Pan Docs.
//!
//! The host-facing surface of this crate is intentionally narrow: load a
//! [`bus::cartridge::Cartridge`], build an [`emulator::Emulator`] around it,
//! and call [`emulator::Emulator::tick`] once per machine cycle. Everything
//! a host needs to draw a frame or read a keypress comes back through the
//! [`renderer::Renderer`] and [`bus::joypad::Controller`] traits; the core
//! never touches a window, a file or a thread.

#[cfg(any(test, feature = "debug"))]
#[macro_use]
extern crate std;
extern crate core;
// The alloc crate is used for allocating cartridge ROM/RAM on the heap.
#[cfg(feature = "alloc")]
extern crate alloc;

pub mod bus;
pub mod config;
pub mod cpu;
pub mod emulator;
pub mod interrupts;
pub mod renderer;

use core::fmt;

/// The library's exported errors.
///
/// Most bus and register operations are infallible by construction (every
/// address is routed, every register write is masked); `GameboyError` is
/// reserved for the handful of places the specification calls out as
/// genuinely fallible: loading a cartridge image and decoding an opcode.
pub enum GameboyError {
	/// The cartridge image failed a header check, or named a mapper this
	/// core does not implement.
	Cartridge(&'static str),
	/// Generic IO related error.
	Io(&'static str),
	/// Unexpected address error.
	BadAddress(u16),
	/// One of the DMG's undefined opcodes was fetched. On real hardware
	/// this locks the CPU; the core surfaces it as a fatal stop.
	IllegalOpcode(u8),
	/// The CPU's internal scheduling state became inconsistent (memory-op
	/// queue overflow, or an instruction with no further operation to
	/// perform). This can only happen from a bug in the core itself.
	InternalFault(&'static str),
}

impl fmt::Display for GameboyError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			GameboyError::Cartridge(ref info) => write!(f, "Cartridge error: {}", info),
			GameboyError::Io(ref info) => write!(f, "IO error: {}", info),
			GameboyError::BadAddress(address) => write!(f, "Bad address: 0x{:x}", address),
			GameboyError::IllegalOpcode(opcode) => write!(f, "Illegal opcode: 0x{:02x}", opcode),
			GameboyError::InternalFault(info) => write!(f, "Internal fault: {}", info),
		}
	}
}

impl fmt::Debug for GameboyError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		(self as &dyn fmt::Display).fmt(f)
	}
}

#[cfg(feature = "std")]
impl std::error::Error for GameboyError {}
