use std::path::PathBuf;
use std::process::Command;

fn workdir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("losslab_cli_smoke_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_gradient_png(path: &PathBuf) {
    let img = image::RgbImage::from_fn(48, 32, |x, y| image::Rgb([(x * 5) as u8, (y * 7) as u8, 90]));
    img.save(path).unwrap();
}

#[test]
fn cli_jpegls_verify_writes_output_and_json() {
    let dir = workdir("jpegls");
    let input = dir.join("gradient.png");
    write_gradient_png(&input);
    let out_dir = dir.join("out");

    let output = Command::new(env!("CARGO_BIN_EXE_losslab"))
        .arg(&input)
        .args(["--codec", "jpegls", "-o", "interleaveMode=sample", "--verify", "--json"])
        .arg("--output")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let log: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = log.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["status"], "success");
    assert_eq!(entries[0]["codec"], "LOSSLESS_NEAR_JPEG");
    assert_eq!(entries[0]["metrics"]["original_size"], 48 * 32 * 3);
    assert_eq!(entries[0]["configuration_echo"]["interleaveMode"], "sample");
    assert_eq!(entries[0]["rotation"], 0);

    let written = std::fs::read(out_dir.join("gradient.jls")).unwrap();
    assert_eq!(&written[..2], &[0xFF, 0xD8]);
    assert_eq!(
        entries[0]["metrics"]["compressed_size"],
        written.len() as u64
    );
}

#[test]
fn cli_png_sweep_prints_one_row_per_level() {
    let dir = workdir("sweep");
    let input = dir.join("gradient.png");
    write_gradient_png(&input);

    let output = Command::new(env!("CARGO_BIN_EXE_losslab"))
        .arg(&input)
        .args(["--sweep", "--rotate", "90"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("File name"));
    assert!(header.contains("Rotation"));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 10);
    // Newest first: the last level swept is listed on top
    assert!(rows[0].contains("compressLevel=9"));
    assert!(rows[9].contains("compressLevel=0"));
    assert!(rows.iter().all(|row| row.contains(" 90 ")));
}

#[test]
fn cli_rejects_out_of_range_level() {
    let dir = workdir("invalid");
    let input = dir.join("gradient.png");
    write_gradient_png(&input);

    let output = Command::new(env!("CARGO_BIN_EXE_losslab"))
        .arg(&input)
        .args(["-o", "compressLevel=15"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("compressLevel"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}
