//! Integration tests for the kanimate CLI
//!
//! These tests verify end-to-end behavior of the CLI by running the binary
//! against generated fixtures and checking exit codes and output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use image::RgbaImage;
use tempfile::TempDir;

/// Get the path to the kanimate binary cargo built for this test run
fn kanimate_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kanimate"))
}

fn run_kanimate(args: &[&str]) -> Output {
    Command::new(kanimate_binary())
        .args(args)
        .output()
        .expect("failed to execute kanimate")
}

/// Write the square fixture project (scml plus sprite) into `dir`
fn write_square_project(dir: &Path) -> PathBuf {
    let scml = dir.join("square.scml");
    fs::write(
        &scml,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<spriter_data scml_version="1.0" generator="test" generator_version="v1">
    <folder id="0">
        <file id="0" name="square_0.png" width="100" height="100" pivot_x="0" pivot_y="1"/>
    </folder>
    <entity id="0" name="square">
        <animation id="0" name="idle" length="66" interval="33">
            <mainline>
                <key id="0" time="0">
                    <object_ref id="0" timeline="0" key="0" z_index="0"/>
                </key>
                <key id="1" time="33">
                    <object_ref id="0" timeline="0" key="1" z_index="0"/>
                </key>
            </mainline>
            <timeline id="0" name="square_0">
                <key id="0" time="0">
                    <object folder="0" file="0" x="0" y="0" angle="0"/>
                </key>
                <key id="1" time="33">
                    <object folder="0" file="0" x="10" y="0" angle="0"/>
                </key>
            </timeline>
        </animation>
    </entity>
</spriter_data>
"#,
    )
    .expect("failed to write scml fixture");

    let sprite = RgbaImage::new(100, 100);
    sprite
        .save(dir.join("square_0.png"))
        .expect("failed to write sprite fixture");
    scml
}

/// Convert the square fixture to a kanim triple under `out`, returning the
/// three artifact paths (build, anim, atlas)
fn build_square_triple(project: &TempDir, out: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let scml = write_square_project(project.path());
    let output = run_kanimate(&["kanim", scml.to_str().unwrap(), "-o", out.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "kanim conversion failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    (
        out.join("square_build.bytes"),
        out.join("square_anim.bytes"),
        out.join("square.png"),
    )
}

#[test]
fn test_kanim_command_writes_triple() {
    let project = TempDir::new().expect("temp dir");
    let out = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, out.path());

    assert!(build.is_file());
    assert!(anim.is_file());
    assert!(atlas.is_file());
}

#[test]
fn test_kanim_command_reports_saved_files() {
    let project = TempDir::new().expect("temp dir");
    let out = TempDir::new().expect("temp dir");
    let scml = write_square_project(project.path());

    let output = run_kanimate(&[
        "kanim",
        scml.to_str().unwrap(),
        "-o",
        out.path().to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("Saved:").count(), 3);
    assert!(stdout.contains("square_build.bytes"));
}

#[test]
fn test_silent_flag_suppresses_saved_lines() {
    let project = TempDir::new().expect("temp dir");
    let out = TempDir::new().expect("temp dir");
    let scml = write_square_project(project.path());

    let output = run_kanimate(&[
        "kanim",
        scml.to_str().unwrap(),
        "-s",
        "-o",
        out.path().to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_scml_command_round_trips() {
    let project = TempDir::new().expect("temp dir");
    let triple_dir = TempDir::new().expect("temp dir");
    let back_dir = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, triple_dir.path());

    let output = run_kanimate(&[
        "scml",
        build.to_str().unwrap(),
        anim.to_str().unwrap(),
        atlas.to_str().unwrap(),
        "-o",
        back_dir.path().to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "scml conversion failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(back_dir.path().join("square.scml").is_file());
    assert!(back_dir.path().join("square_0.png").is_file());
}

#[test]
fn test_convert_command_normalizes_kanim_to_kanim() {
    let project = TempDir::new().expect("temp dir");
    let triple_dir = TempDir::new().expect("temp dir");
    let repack_dir = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, triple_dir.path());

    let output = run_kanimate(&[
        "convert",
        "-I",
        "kanim",
        "-O",
        "kanim",
        build.to_str().unwrap(),
        anim.to_str().unwrap(),
        atlas.to_str().unwrap(),
        "-o",
        repack_dir.path().to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "kanim to kanim failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let original = fs::read(&anim).expect("read original anim");
    let repacked = fs::read(repack_dir.path().join("square_anim.bytes")).expect("read repack");
    assert_eq!(original, repacked);
}

#[test]
fn test_info_prints_json_summary() {
    let project = TempDir::new().expect("temp dir");
    let out = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, out.path());

    let output = run_kanimate(&[
        "info",
        build.to_str().unwrap(),
        anim.to_str().unwrap(),
        atlas.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("info output should be JSON");
    assert_eq!(summary["name"], "square");
    assert_eq!(summary["anims"], 1);
    assert_eq!(summary["symbols"], 1);
}

#[test]
fn test_dump_flag_writes_debug_trace() {
    let project = TempDir::new().expect("temp dir");
    let triple_dir = TempDir::new().expect("temp dir");
    let back_dir = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, triple_dir.path());

    let dump_path = back_dir.path().join("trace.txt");
    let output = run_kanimate(&[
        "scml",
        build.to_str().unwrap(),
        anim.to_str().unwrap(),
        atlas.to_str().unwrap(),
        "-o",
        back_dir.path().to_str().unwrap(),
        "--dump",
        dump_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let trace = fs::read_to_string(&dump_path).expect("dump file should exist");
    assert!(trace.contains("=== SPRITE SHEET ==="));
}

#[test]
fn test_swapped_chunks_exit_with_header_code() {
    let project = TempDir::new().expect("temp dir");
    let triple_dir = TempDir::new().expect("temp dir");
    let broken_dir = TempDir::new().expect("temp dir");
    let (build, anim, atlas) = build_square_triple(&project, triple_dir.path());

    // The build slot gets ANIM bytes, so its magic check fails.
    let swapped_build = broken_dir.path().join("square_build.bytes");
    let swapped_anim = broken_dir.path().join("square_anim.bytes");
    fs::copy(&anim, &swapped_build).expect("copy anim bytes");
    fs::copy(&build, &swapped_anim).expect("copy build bytes");

    let output = run_kanimate(&[
        "scml",
        swapped_build.to_str().unwrap(),
        swapped_anim.to_str().unwrap(),
        atlas.to_str().unwrap(),
        "-o",
        broken_dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_missing_input_is_invalid_args() {
    let output = run_kanimate(&["kanim", "no_such_project.scml"]);
    assert_eq!(output.status.code(), Some(3));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_unknown_format_is_invalid_args() {
    let output = run_kanimate(&["convert", "-I", "gif", "-O", "scml", "whatever.gif"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_bad_usage_and_help_exit_codes() {
    let bare = run_kanimate(&[]);
    assert_eq!(bare.status.code(), Some(3));

    let help = run_kanimate(&["--help"]);
    assert_eq!(help.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&help.stdout);
    assert!(stdout.contains("kanim"));
}
