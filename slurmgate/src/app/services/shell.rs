// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for paths.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '@' | ',' | '+' | '%')
}

/// Quotes a single argument only when it contains characters the shell would interpret.
pub fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_shell_safe) {
        arg.to_string()
    } else {
        sh_escape(arg)
    }
}

/// Joins an argument vector into one command line, quoting as needed.
pub fn join_command<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote_arg(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_escape_wraps_and_escapes_single_quotes() {
        assert_eq!(sh_escape("a b"), "'a b'");
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn quote_arg_leaves_plain_paths_alone() {
        assert_eq!(quote_arg("/work/demo_ab12cd34/protein.pdb"), "/work/demo_ab12cd34/protein.pdb");
        assert_eq!(quote_arg("-o"), "-o");
        assert_eq!(quote_arg("1A7X_A"), "1A7X_A");
    }

    #[test]
    fn quote_arg_quotes_spaces_and_metacharacters() {
        assert_eq!(quote_arg("my file.pdb"), "'my file.pdb'");
        assert_eq!(quote_arg("x; rm -rf ~"), "'x; rm -rf ~'");
        assert_eq!(quote_arg("$(id)"), "'$(id)'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn join_command_quotes_per_argument() {
        let cmd = join_command(&["masif-preprocess", "/w/a b.pdb", "A", "-o", "/w"]);
        assert_eq!(cmd, "masif-preprocess '/w/a b.pdb' A -o /w");
    }
}
