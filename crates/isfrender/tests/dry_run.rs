use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

const FEEDBACK: &str = r#"/*{
    "DESCRIPTION": "fading trails",
    "INPUTS": [
        { "NAME": "decay", "TYPE": "float", "DEFAULT": 0.9 },
        { "NAME": "tint", "TYPE": "color", "DEFAULT": [1.0, 1.0, 1.0, 1.0] },
        { "NAME": "inputImage", "TYPE": "image" }
    ],
    "PASSES": [
        { "TARGET": "trail", "PERSISTENT": true, "FLOAT": true },
        {}
    ]
}*/
void main() {
    if (PASSINDEX == 1) gl_FragColor = max(IMG_THIS_NORM_PIXEL(trail) * decay, IMG_THIS_NORM_PIXEL(inputImage));
    else gl_FragColor = IMG_THIS_NORM_PIXEL(trail) * tint;
}
"#;

fn write_shader(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("trails.fs");
    fs::write(&path, FEEDBACK).unwrap();
    image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 255, 0, 255]))
        .save(dir.join("photo.png"))
        .unwrap();
    path
}

fn isfrender(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_isfrender"))
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run isfrender")
}

#[test]
fn dry_run_reports_every_frame() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path());
    let photo = dir.path().join("photo.png");
    let image_arg = format!("inputImage={}", photo.display());

    let output = isfrender(&[
        shader.to_str().unwrap(),
        "--dry-run",
        "--frames",
        "3",
        "--fps",
        "2",
        "--size",
        "32x16",
        "--set",
        "decay=0.5",
        "--set",
        "tint=1,0,0",
        "--image",
        &image_arg,
        "--output",
        "trail.png",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let frames: Vec<&str> = stdout.lines().filter(|line| line.starts_with("frame ")).collect();
    assert_eq!(frames.len(), 3);
    assert!(frames[0].contains("time=0.000"));
    assert!(frames[2].contains("time=1.000"));
    assert!(frames[1].contains("passes=2"));
    assert!(frames[1].contains("output=32x16"));
    assert!(frames[2].ends_with("trail-0002.png"));
    assert!(stdout.contains("programs compiled: 1 (input types: 2)"));
}

#[test]
fn dry_run_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path());
    let config = dir.path().join("render.toml");
    fs::write(
        &config,
        r#"
        [render]
        size = "8x8"
        float = true

        [inputs]
        decay = 0.25
        tint = [0.0, 0.0, 1.0]

        [images]
        inputImage = "photo.png"
        "#,
    )
    .unwrap();

    let output = isfrender(&[
        shader.to_str().unwrap(),
        "--dry-run",
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("output=8x8 Float"));
}

#[test]
fn unknown_inputs_fail_the_run() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path());

    let output = isfrender(&[shader.to_str().unwrap(), "--dry-run", "--set", "missing=1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing"));
}

#[test]
fn unbound_image_input_is_reported() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path());

    let output = isfrender(&[shader.to_str().unwrap(), "--dry-run"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("inputImage"));
}

#[test]
fn list_inputs_prints_declarations() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(dir.path());

    let output = isfrender(&[shader.to_str().unwrap(), "--list-inputs"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("trails (Filter)"));
    assert!(stdout.contains("fading trails"));
    assert!(stdout.contains("decay"));
    assert!(stdout.contains("default=0.9"));
    assert!(stdout.contains("default=1,1,1,1"));
    assert!(stdout.contains("target=trail persistent,float"));
}
