// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

#[derive(Debug, ThisError)]
#[error("{operation} timed out after {secs}s")]
pub struct TimedOut {
    pub operation: &'static str,
    pub secs: u64,
}
