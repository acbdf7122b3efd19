// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::{AppResult, invalid_argument};

pub const ALLOWED_INPUT_EXTENSIONS: &[&str] = &["pdb", "sdf"];

/// Reduces a user-supplied name to a single safe path component.
/// Returns an empty string when nothing usable is left.
pub fn secure_filename(raw: &str) -> String {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim();
    let replaced: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_start_matches(['.', '_']).trim_end_matches('_').to_string()
}

pub fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_INPUT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Sanitizes a relative path component by component, rejecting traversal.
pub fn secure_relative_path(raw: &str) -> AppResult<String> {
    let mut parts = Vec::new();
    for part in raw.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(invalid_argument(format!("path '{raw}' escapes the job directory")));
        }
        let safe = secure_filename(part);
        if safe.is_empty() {
            return Err(invalid_argument(format!("path '{raw}' has an unusable component")));
        }
        parts.push(safe);
    }
    if parts.is_empty() {
        return Err(invalid_argument("path must not be empty"));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_directories_and_odd_characters() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("my protein (1).pdb"), "my_protein__1_.pdb");
        assert_eq!(secure_filename("C:\\data\\x.sdf"), "x.sdf");
        assert_eq!(secure_filename(".hidden"), "hidden");
        assert_eq!(secure_filename("   "), "");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_allowed_extension("protein.pdb"));
        assert!(has_allowed_extension("LIG.SDF"));
        assert!(!has_allowed_extension("notes.txt"));
        assert!(!has_allowed_extension("pdb"));
    }

    #[test]
    fn relative_paths_are_sanitized_per_component() {
        assert_eq!(
            secure_relative_path("output/result.ply").unwrap(),
            "output/result.ply"
        );
        assert_eq!(
            secure_relative_path("./output//a b.ply").unwrap(),
            "output/a_b.ply"
        );
        assert!(secure_relative_path("../secret").is_err());
        assert!(secure_relative_path("").is_err());
    }
}
