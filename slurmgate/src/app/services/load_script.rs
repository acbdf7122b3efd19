// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Viewer-side files placed in a visualization session directory.
//!
//! All paths written into these files are the paths the viewer container sees,
//! not local ones.

use std::fmt::Write as _;
use std::path::Path;

use walkdir::WalkDir;

use crate::app::types::JobRecord;

pub const LOAD_SCRIPT_NAME: &str = "load_results.pml";
pub const STARTUP_SCRIPT_NAME: &str = "startup.pml";
pub const README_NAME: &str = "README.txt";
pub const SESSION_DESCRIPTOR_NAME: &str = "session.json";
pub const SESSION_DATA_DIR: &str = "data";

const SURFACE_EXTENSION: &str = "ply";
const BANNER: &str = "============================================================";

/// PyMOL object names may not contain `-` or `.`.
pub fn object_name(stem: &str) -> String {
    stem.replace(['-', '.'], "_")
}

pub fn surface_color(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.contains("target") {
        "red"
    } else if lower.contains("ligand") {
        "yellow"
    } else {
        "green"
    }
}

/// Surface meshes under `data_dir`, as sorted `/`-separated relative paths.
pub fn find_surfaces(data_dir: &Path) -> Vec<String> {
    let mut surfaces: Vec<String> = WalkDir::new(data_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SURFACE_EXTENSION))
        })
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(data_dir).ok()?;
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect();
    surfaces.sort();
    surfaces
}

/// Builds `load_results.pml` for the job copy in `data_dir`, which the viewer
/// sees mounted at `container_data_path`.
pub fn render_load_script(container_data_path: &str, record: &JobRecord, data_dir: &Path) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "# MaSIF-neosurf Results Visualization");
    let _ = writeln!(script, "# Job: {}", record.job_name);
    let _ = writeln!(script, "# Chain: {}", record.chain_id);
    let _ = writeln!(script, "# Submitted: {}", record.submitted_at);
    let _ = writeln!(script);
    let _ = writeln!(script, "print \"{BANNER}\"");
    let _ = writeln!(script, "print \"Loading MaSIF-neosurf results...\"");
    let _ = writeln!(script, "print \"Job: {}\"", record.job_name);
    let _ = writeln!(script, "print \"{BANNER}\"");
    let _ = writeln!(script);
    script.push_str(
        "bg_color white\n\
         set antialias, 2\n\
         set ray_trace_mode, 1\n\
         set surface_quality, 2\n\
         set transparency, 0.3\n\n",
    );

    let structure = &record.input_file;
    if data_dir.join(structure).is_file() {
        let _ = writeln!(script, "load {container_data_path}/{structure}, protein");
        script.push_str("color cyan, protein\nshow cartoon, protein\nhide lines, protein\n");
        let _ = writeln!(script, "print 'Loaded protein structure: {structure}'");
    } else {
        let _ = writeln!(script, "print 'Warning: PDB file not found: {structure}'");
    }
    script.push('\n');

    let surfaces = find_surfaces(data_dir);
    if surfaces.is_empty() {
        script.push_str("print 'Warning: No .ply surface files found'\n");
    } else {
        for rel in &surfaces {
            let file_name = rel.rsplit('/').next().unwrap_or(rel);
            let stem = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name);
            let obj = object_name(stem);
            let _ = writeln!(script, "load {container_data_path}/{rel}, {obj}");
            let _ = writeln!(script, "color {}, {obj}", surface_color(file_name));
        }
        let _ = writeln!(script, "print 'Loaded {} surface files'", surfaces.len());
    }
    script.push('\n');

    script.push_str("zoom\ncenter\n\n");
    let _ = writeln!(script, "print \"{BANNER}\"");
    script.push_str(
        "print \"Mouse controls:\"\n\
         print \"  Rotate: Left-click and drag\"\n\
         print \"  Zoom: Scroll wheel\"\n\
         print \"  Pan: Right-click and drag\"\n\n\
         set label_size, 20\n\
         set label_color, black\n",
    );
    script
}

pub fn render_startup_script(script_path: &str) -> String {
    format!("@{script_path}\n")
}

pub fn render_readme(job_name: &str, container_session_path: &str, expires_at: &str) -> String {
    format!(
        "MaSIF-neosurf Results - {job_name}\n\
         {BANNER}\n\n\
         To load the results in PyMOL, run this command in the PyMOL console:\n\n    \
         @{container_session_path}/{LOAD_SCRIPT_NAME}\n\n\
         Or drag and drop the {LOAD_SCRIPT_NAME} file into PyMOL.\n\n\
         Files are located in: {container_session_path}/{SESSION_DATA_DIR}/\n\n\
         Session expires at: {expires_at}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn record() -> JobRecord {
        JobRecord {
            job_id: "42".into(),
            job_uuid: "ab12cd34".into(),
            job_name: "demo".into(),
            owner_id: "alice".into(),
            owner_email: None,
            local_job_dir: PathBuf::from("/cache/demo_ab12cd34"),
            remote_job_dir: "/work/demo_ab12cd34".into(),
            input_file: "protein.pdb".into(),
            secondary_file: None,
            chain_id: "A".into(),
            ligand_id: None,
            submitted_at: "2026-01-01T00:00:00Z".into(),
            command: "masif-preprocess".into(),
        }
    }

    #[test]
    fn object_names_replace_dashes_and_dots() {
        assert_eq!(object_name("1abc-A.target"), "1abc_A_target");
    }

    #[test]
    fn surfaces_are_colored_by_role() {
        assert_eq!(surface_color("x_Target.ply"), "red");
        assert_eq!(surface_color("ligand_surface.ply"), "yellow");
        assert_eq!(surface_color("other.ply"), "green");
    }

    #[test]
    fn load_script_references_container_paths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("protein.pdb"), b"ATOM").unwrap();
        fs::create_dir_all(dir.path().join("output/b")).unwrap();
        fs::write(dir.path().join("output/b/p-1.target.ply"), b"ply").unwrap();
        fs::write(dir.path().join("output/a_ligand.ply"), b"ply").unwrap();
        fs::write(dir.path().join("output/notes.txt"), b"x").unwrap();

        let script = render_load_script("/data/s1/data", &record(), dir.path());

        assert!(script.contains("load /data/s1/data/protein.pdb, protein\n"));
        assert!(script.contains("color cyan, protein\n"));
        assert!(script.contains("show cartoon, protein\n"));
        let first = script.find("load /data/s1/data/output/a_ligand.ply, a_ligand\n").unwrap();
        let second = script
            .find("load /data/s1/data/output/b/p-1.target.ply, p_1_target\n")
            .unwrap();
        assert!(first < second);
        assert!(script.contains("color yellow, a_ligand\n"));
        assert!(script.contains("color red, p_1_target\n"));
        assert!(script.contains("print 'Loaded 2 surface files'"));
        assert!(!script.contains("notes.txt"));
    }

    #[test]
    fn load_script_warns_when_inputs_are_missing() {
        let dir = tempdir().unwrap();
        let script = render_load_script("/data/s1/data", &record(), dir.path());
        assert!(script.contains("Warning: PDB file not found: protein.pdb"));
        assert!(script.contains("Warning: No .ply surface files found"));
    }

    #[test]
    fn startup_and_readme_point_at_load_script() {
        assert_eq!(
            render_startup_script("/data/s1/load_results.pml"),
            "@/data/s1/load_results.pml\n"
        );
        let readme = render_readme("demo", "/data/s1", "2026-01-01 01:00:00");
        assert!(readme.contains("@/data/s1/load_results.pml"));
        assert!(readme.contains("Files are located in: /data/s1/data/"));
    }
}
