use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser as ClapParser};
use serde::Serialize;

use streamform::config::FormParserConfig;
use streamform::form::{FormParser, Visitor};
use streamform::sink::{Field, FieldValue, File};

/// streamform CLI — parses an HTTP form body and dumps the extracted
/// fields/files.
///
/// Reads a raw body from a file, --raw string, or stdin, parses it against
/// the given --content-type, and outputs a structured representation in the
/// chosen format.
///
/// Escape sequences (\r, \n, \t, \\) in the --raw value are interpreted so
/// you can pass a full body as a single shell argument.
#[derive(ClapParser)]
#[command(name = "streamform-cli", version, about, long_about = None)]
struct Cli {
    /// Path to a file containing the raw body. Reads from stdin when
    /// neither FILE nor --raw is given.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Raw body string (escape sequences \r \n \t \\ are expanded).
    #[arg(long)]
    raw: Option<String>,

    /// The body's Content-Type, e.g. "multipart/form-data; boundary=xyz".
    #[arg(long)]
    content_type: String,

    /// X-File-Name header value, used only for application/octet-stream.
    #[arg(long)]
    file_name: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "json", value_enum)]
    format: OutputFormat,

    /// Pretty-print JSON output (ignored for other formats).
    #[arg(short, long)]
    pretty: bool,

    /// Maximum allowed body size in bytes.
    #[arg(long, default_value_t = u64::MAX)]
    max_body_size: u64,

    /// Byte count above which an uploaded file spills to disk.
    #[arg(long, default_value_t = 1 << 20)]
    max_memory_file_size: u64,

    /// Reject malformed querystring bodies instead of tolerating them.
    #[arg(long)]
    strict_querystring: bool,

    /// Fail on an unrecognized Content-Transfer-Encoding instead of passing
    /// the part through unchanged.
    #[arg(long)]
    upload_error_on_bad_cte: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable debug output
    Debug,
}

#[derive(Serialize)]
struct Report {
    fields: Vec<FieldReport>,
    files: Vec<FileReport>,
}

#[derive(Serialize)]
struct FieldReport {
    name: String,
    value: Option<String>,
}

#[derive(Serialize)]
struct FileReport {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
    spooled_to: Option<String>,
}

#[derive(Default)]
struct Collector {
    fields: Vec<FieldReport>,
    files: Vec<FileReport>,
}

impl Visitor for Collector {
    fn on_field(&mut self, field: Field) {
        let value = match field.value() {
            FieldValue::Unset | FieldValue::Null => None,
            FieldValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        };
        self.fields.push(FieldReport {
            name: String::from_utf8_lossy(field.name()).into_owned(),
            value,
        });
    }

    fn on_file(&mut self, file: File) {
        self.files.push(FileReport {
            field_name: String::from_utf8_lossy(file.field_name()).into_owned(),
            file_name: file.file_name().map(|n| String::from_utf8_lossy(n).into_owned()),
            content_type: file
                .content_type()
                .map(|c| String::from_utf8_lossy(c).into_owned()),
            size: file.size(),
            spooled_to: file.on_disk_path().map(|p| p.display().to_string()),
        });
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.file.is_none() && cli.raw.is_none() && std::io::stdin().is_terminal() {
        Cli::command().print_help().ok();
        println!();
        process::exit(0);
    }

    let data = match read_input(&cli) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error reading input: {e}");
            process::exit(1);
        }
    };

    let config = FormParserConfig {
        max_body_size: cli.max_body_size,
        max_memory_file_size: cli.max_memory_file_size,
        strict_querystring: cli.strict_querystring,
        upload_error_on_bad_cte: cli.upload_error_on_bad_cte,
        ..FormParserConfig::default()
    };

    let mut parser = match FormParser::new(
        cli.content_type.as_bytes(),
        cli.file_name.map(String::into_bytes),
        config,
        Collector::default(),
    ) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Parse error: {e}");
            process::exit(2);
        }
    };

    if let Err(e) = parser.feed(&data) {
        eprintln!("Parse error: {e}");
        process::exit(2);
    }
    if let Err(e) = parser.finalize() {
        eprintln!("Parse error: {e}");
        process::exit(2);
    }

    let collected = parser.into_visitor();
    let report = Report {
        fields: collected.fields,
        files: collected.files,
    };

    let output = match cli.format {
        OutputFormat::Json => format_json(&report, cli.pretty),
        OutputFormat::Debug => format_debug(&report),
    };

    println!("{output}");
}

fn format_json(report: &Report, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    } else {
        serde_json::to_string(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

fn format_debug(report: &Report) -> String {
    let mut out = String::new();
    for field in &report.fields {
        out.push_str(&format!(
            "field {} = {:?}\n",
            field.name,
            field.value.as_deref().unwrap_or("")
        ));
    }
    for file in &report.files {
        out.push_str(&format!(
            "file {} filename={:?} content_type={:?} size={} spooled_to={:?}\n",
            file.field_name, file.file_name, file.content_type, file.size, file.spooled_to
        ));
    }
    out
}

/// Read raw body bytes from --raw, a file, or stdin.
fn read_input(cli: &Cli) -> Result<Vec<u8>, std::io::Error> {
    if let Some(raw) = &cli.raw {
        return Ok(unescape(raw).into_bytes());
    }
    match &cli.file {
        Some(path) => std::fs::read(path),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Expand C-style escape sequences (`\r`, `\n`, `\t`, `\\`) in a string.
///
/// Any other `\X` sequence is kept as-is (both the backslash and `X`).
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
