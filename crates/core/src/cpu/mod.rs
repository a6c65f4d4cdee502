// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod alu;
pub mod cortex_m;
pub mod exclusive;
pub mod ops;
pub mod registers;

pub use cortex_m::CortexM;
