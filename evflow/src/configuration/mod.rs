// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration of the mainloop and its pipeline

pub mod mainloop;
pub mod pipeline;
