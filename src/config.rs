// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Emulator hardware emulation configuration and preferences.

/// The hardware model being emulated.
///
/// Game Boy Color and Super Game Boy extensions are out of scope for this
/// core (see the crate's top-level documentation); the variant exists as
/// an extension point for a host that wants to gate optional behavior, but
/// every model currently resets to the same documented DMG post-boot-ROM
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareModel {
	/// Original Game Boy (DMG).
	Dmg,
}

impl Default for HardwareModel {
	fn default() -> Self {
		HardwareModel::Dmg
	}
}

/// Emulation settings and preferences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
	/// The model of the emulated machine.
	pub model: HardwareModel,
}
