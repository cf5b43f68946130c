use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use losslab_core::codec::{jpegls, ConfigParseError};
use losslab_core::{
    CodecId, Completion, Configuration, EncodeRequest, EncodeResult, LogEntry, OptionValue,
    RasterBuffer, ResultLog, TaskRunner,
};
use tracing_subscriber::EnvFilter;

/// How often the main thread checks for a finished encode.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "losslab", version, about = "Encode images losslessly and compare the cost")]
struct Cli {
    /// Input images (PNG, JPEG or JPEG-LS).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Codec to encode with: png or jpegls.
    #[arg(long, short, default_value = "png")]
    codec: CodecId,

    /// Codec option as key=value, overriding the codec default. Repeatable.
    #[arg(
        long = "option",
        short = 'o',
        value_name = "KEY=VALUE",
        value_parser = parse_option,
        conflicts_with = "sweep"
    )]
    options: Vec<(String, OptionValue)>,

    /// Rotate clockwise by this many degrees before encoding (multiple of 90).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    rotate: i32,

    /// Encode once per valid configuration of the codec.
    #[arg(long)]
    sweep: bool,

    /// Decode each output and check it matches the source pixels.
    #[arg(long)]
    verify: bool,

    /// Directory to write encoded files into.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Print the result log as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Log at debug level.
    #[arg(long, short)]
    verbose: bool,
}

fn parse_option(text: &str) -> Result<(String, OptionValue), ConfigParseError> {
    Configuration::parse_pair(text)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let quarter_turns = quarter_turns(cli.rotate)?;
    let rotation = rotation_degrees(quarter_turns);
    let configurations = if cli.sweep {
        cli.codec.codec().configurations()
    } else {
        let overlay = cli
            .options
            .iter()
            .fold(cli.codec.default_configuration(), |config, (key, value)| {
                config.with(key.clone(), value.clone())
            });
        vec![overlay]
    };

    if let Some(dir) = &cli.output {
        fs::create_dir_all(dir)
            .with_context(|| format!("create output dir '{}'", dir.display()))?;
    }

    let runner = TaskRunner::new();
    let mut log = ResultLog::new();

    for path in &cli.inputs {
        let source = load_raster(path)?.rotated(quarter_turns);
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::debug!(
            file = %label,
            width = source.width(),
            height = source.height(),
            format = %source.format(),
            "loaded"
        );

        for configuration in &configurations {
            let request = EncodeRequest::new(source.clone(), cli.codec, configuration.clone())
                .with_context(|| format!("encode '{label}'"))?
                .with_label(label.as_str());
            runner.submit(request)?;
            let completion = await_completion(&runner)?;

            if let Ok(result) = &completion.outcome {
                if cli.verify {
                    verify(&source, result)?;
                }
                if let Some(dir) = &cli.output {
                    write_output(dir, path, result, cli.sweep)?;
                }
            }
            log.append(completion);
        }
    }
    runner.shutdown();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&json_report(&log, rotation)?)?);
    } else {
        print_table(&log, rotation);
    }

    let failures = log.iter().filter(|entry| !entry.is_success()).count();
    if failures > 0 {
        anyhow::bail!("{failures} of {} encodes failed", log.len());
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn quarter_turns(degrees: i32) -> anyhow::Result<i32> {
    if degrees % 90 != 0 {
        anyhow::bail!("--rotate must be a multiple of 90, got {degrees}");
    }
    Ok(degrees / 90)
}

/// Clockwise rotation in `0..360` reported next to each result.
fn rotation_degrees(quarter_turns: i32) -> u32 {
    quarter_turns.rem_euclid(4).unsigned_abs() * 90
}

fn load_raster(path: &Path) -> anyhow::Result<RasterBuffer> {
    let is_jpegls = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CodecId::LosslessNearJpeg.extension()));

    if is_jpegls {
        let bytes = fs::read(path).with_context(|| format!("read '{}'", path.display()))?;
        return jpegls::decode_jpegls(&bytes)
            .with_context(|| format!("decode JPEG-LS '{}'", path.display()));
    }

    let img = image::open(path).with_context(|| format!("read image '{}'", path.display()))?;
    Ok(RasterBuffer::from_dynamic_image(img))
}

/// Poll until the runner reports the submitted task.
fn await_completion(runner: &TaskRunner) -> anyhow::Result<Completion> {
    loop {
        if let Some(completion) = runner.next_timeout(POLL_INTERVAL) {
            return Ok(completion);
        }
        if runner.outstanding() == 0 {
            anyhow::bail!("encode thread exited without reporting a result");
        }
        tracing::debug!("encode still running");
    }
}

fn verify(source: &RasterBuffer, result: &EncodeResult) -> anyhow::Result<()> {
    let decoded = result
        .decode_preview()
        .with_context(|| format!("decode {} output for verification", result.codec))?;
    if decoded != *source {
        anyhow::bail!(
            "{} output for '{}' does not reproduce the source pixels",
            result.codec,
            result.label.as_deref().unwrap_or("image")
        );
    }
    tracing::debug!(codec = %result.codec, "round trip verified");
    Ok(())
}

fn write_output(
    dir: &Path,
    input: &Path,
    result: &EncodeResult,
    tag_configuration: bool,
) -> anyhow::Result<()> {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = if tag_configuration {
        format!("{stem}-{}", configuration_slug(&result.configuration_echo))
    } else {
        stem
    };
    let out = dir.join(format!("{name}.{}", result.codec.extension()));

    fs::write(&out, &result.compressed_bytes)
        .with_context(|| format!("write '{}'", out.display()))?;
    tracing::info!(path = %out.display(), bytes = result.len(), "wrote");
    Ok(())
}

fn configuration_slug(configuration: &Configuration) -> String {
    configuration
        .iter()
        .map(|(key, value)| format!("{key}-{value}"))
        .collect::<Vec<_>>()
        .join("_")
}

const HEADERS: [&str; 8] = [
    "File name",
    "Encoded Type",
    "Original Size",
    "Compressed Size",
    "Compression Ratio",
    "Time",
    "Rotation",
    "Configuration",
];

fn table_row(entry: &LogEntry, rotation: u32) -> [String; 8] {
    let name = entry.label().unwrap_or("-").to_string();
    let time = format!("{:.2} ms", entry.elapsed().as_secs_f64() * 1000.0);
    let rotation = rotation.to_string();
    let configuration = entry.configuration().to_string();

    match entry {
        LogEntry::Success(result) => [
            name,
            result.codec.to_string(),
            result.metrics.original_size().to_string(),
            result.metrics.compressed_size().to_string(),
            format!("{:.4}", result.metrics.display_ratio()),
            time,
            rotation,
            configuration,
        ],
        LogEntry::Failure(record) => [
            name,
            record.codec.to_string(),
            "-".to_string(),
            "-".to_string(),
            format!("failed: {}", record.error),
            time,
            rotation,
            configuration,
        ],
    }
}

/// The result log as a JSON array, each entry tagged with the rotation
/// applied to its source.
fn json_report(log: &ResultLog, rotation: u32) -> serde_json::Result<serde_json::Value> {
    let rows = log
        .iter()
        .map(|entry| {
            let mut row = serde_json::to_value(entry)?;
            if let Some(fields) = row.as_object_mut() {
                fields.insert("rotation".to_string(), rotation.into());
            }
            Ok(row)
        })
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(serde_json::Value::Array(rows))
}

fn print_table(log: &ResultLog, rotation: u32) {
    let rows: Vec<[String; 8]> = log.iter().map(|entry| table_row(entry, rotation)).collect();
    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let print_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        println!("{}", line.join("  ").trim_end());
    };

    print_row(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        print_row(&cells);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_turns() {
        assert_eq!(quarter_turns(0).unwrap(), 0);
        assert_eq!(quarter_turns(270).unwrap(), 3);
        assert_eq!(quarter_turns(-90).unwrap(), -1);
        assert!(quarter_turns(45).is_err());
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(rotation_degrees(0), 0);
        assert_eq!(rotation_degrees(1), 90);
        assert_eq!(rotation_degrees(-1), 270);
        assert_eq!(rotation_degrees(6), 180);
    }

    #[test]
    fn test_rows_record_rotation() {
        let source =
            RasterBuffer::new(2, 2, losslab_core::PixelFormat::Gray8, vec![7u8; 4]).unwrap();
        let runner = TaskRunner::new();
        runner
            .submit(EncodeRequest::with_defaults(source, CodecId::Png).with_label("a.png"))
            .unwrap();
        let mut log = ResultLog::new();
        log.append(runner.wait().unwrap());

        let entry = log.latest().unwrap();
        let row = table_row(entry, 270);
        assert_eq!(row[6], "270");
        assert_eq!(row[7], "compressLevel=6");

        let report = json_report(&log, 270).unwrap();
        assert_eq!(report[0]["rotation"], 270);
        assert_eq!(report[0]["status"], "success");
        assert!(report[0]["configuration_echo"].get("rotation").is_none());
    }

    #[test]
    fn test_cli_parses_options() {
        let cli = Cli::try_parse_from([
            "losslab",
            "a.png",
            "--codec",
            "jpegls",
            "-o",
            "interleaveMode=sample",
            "--rotate",
            "-90",
        ])
        .unwrap();
        assert_eq!(cli.codec, CodecId::LosslessNearJpeg);
        assert_eq!(
            cli.options,
            vec![("interleaveMode".to_string(), OptionValue::from("sample"))]
        );
        assert_eq!(cli.rotate, -90);
    }

    #[test]
    fn test_sweep_conflicts_with_options() {
        let parsed =
            Cli::try_parse_from(["losslab", "a.png", "--sweep", "-o", "compressLevel=1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_configuration_slug() {
        let config = Configuration::new().with("compressLevel", 9);
        assert_eq!(configuration_slug(&config), "compressLevel-9");
    }
}
