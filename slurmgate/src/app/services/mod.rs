// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod archive;
pub mod classify;
pub mod load_script;
pub mod names;
pub mod random;
pub mod script;
pub mod shell;
pub mod slurm;
pub mod sync;
