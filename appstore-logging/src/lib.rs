//! Tracing subscriber setup shared by the store binaries.
//!
//! Settings normally come from the `logging` section of the store
//! configuration. The `LOG_LEVEL`, `LOG_FORMAT`, `LOG_OUTPUT` and
//! `LOG_FILE_PATH` environment variables override them so an operator can
//! raise verbosity without touching the config file.

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Console,
    File,
    Both,
    None,
}

/// Line format of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: LogFormat,
    #[serde(default = "default_output")]
    pub output: LogOutput,
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Human
}

fn default_output() -> LogOutput {
    LogOutput::Console
}

fn default_file_path() -> PathBuf {
    PathBuf::from("/tmp/appstore.log")
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file_path: default_file_path(),
        }
    }
}

impl LogSettings {
    /// Apply `LOG_*` environment overrides on top of these settings.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.format = match format.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Human,
            };
        }
        if let Ok(output) = env::var("LOG_OUTPUT") {
            self.output = match output.as_str() {
                "file" => LogOutput::File,
                "both" => LogOutput::Both,
                "none" => LogOutput::None,
                _ => LogOutput::Console,
            };
        }
        if let Ok(path) = env::var("LOG_FILE_PATH") {
            self.file_path = PathBuf::from(path);
        }
        self
    }

    fn split_file_path(&self) -> (&Path, &std::ffi::OsStr) {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let name = self
            .file_path
            .file_name()
            .unwrap_or_else(|| "appstore.log".as_ref());
        (dir, name)
    }
}

// Writes every line to both sinks; succeeds if either sink accepted it.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

fn build_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for directive in ["tokio=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber.
///
/// Returns the appender guard when file output is active; the caller must
/// keep it alive until shutdown or buffered lines are lost. Calling this
/// twice is harmless: the second installation attempt is ignored.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = build_filter(&settings.level);
    let json = settings.format == LogFormat::Json;
    let subscriber = registry().with(filter);

    macro_rules! install {
        ($writer:expr) => {{
            let layer = tracing_subscriber::fmt::layer().with_writer($writer);
            if json {
                let _ = subscriber.with(layer.json()).try_init();
            } else {
                let _ = subscriber.with(layer.pretty()).try_init();
            }
        }};
    }

    match settings.output {
        LogOutput::Console => {
            install!(io::stdout);
            None
        }
        LogOutput::File => {
            let (dir, name) = settings.split_file_path();
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            install!(writer);
            Some(guard)
        }
        LogOutput::Both => {
            let (dir, name) = settings.split_file_path();
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            install!(MakeTee {
                make_a: io::stdout,
                make_b: writer,
            });
            Some(guard)
        }
        LogOutput::None => {
            let _ = subscriber.try_init();
            None
        }
    }
}
