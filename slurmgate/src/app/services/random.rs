// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use chrono::Local;
use rand::Rng;

pub const JOB_UUID_LEN: usize = 8;

/// Eight lowercase hex characters.
pub fn generate_job_uuid() -> String {
    let mut rng = rand::rng();
    (0..JOB_UUID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..16u32);
            char::from_digit(idx, 16).unwrap_or('0')
        })
        .collect()
}

/// Default job name, e.g. "masif_20260131_142500".
pub fn default_job_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Local::now().format("%Y%m%d_%H%M%S"))
}

pub fn is_job_uuid(value: &str) -> bool {
    value.len() == JOB_UUID_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
