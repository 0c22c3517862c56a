//! Binary entrypoint for the `lircd` dispatcher daemon.

mod app;
mod endpoints;
mod pidfile;
mod reactor;
mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use lircd_common::config::RuntimeConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lircd")]
#[command(about = "IPC dispatcher brokering clients and per-device backends")]
struct Args {
    /// Don't fork to background
    #[arg(short = 'n', long)]
    nodaemon: bool,

    /// Output socket filename
    #[arg(short = 'o', long, default_value = "/var/run/lirc/lircd")]
    output: PathBuf,

    /// File permissions for the output socket, octal
    #[arg(short = 'p', long, default_value = "666")]
    permission: String,

    /// Daemon pid file
    #[arg(short = 'P', long, default_value = "/var/run/lirc/lircd.pid")]
    pidfile: PathBuf,

    /// Log file path (default: stderr)
    #[arg(short = 'L', long)]
    logfile: Option<PathBuf>,

    /// Log level: error, warning, notice, info, debug or trace
    #[arg(short = 'D', long, default_value = "info")]
    loglevel: String,

    /// Accept the SIMULATE command
    #[arg(short = 'a', long)]
    allow_simulate: bool,
}

fn main() {
    let args = Args::parse();
    let Some(level) = parse_loglevel(&args.loglevel) else {
        eprintln!("lircd: bad log level: \"{}\"", args.loglevel);
        std::process::exit(1);
    };
    let Some(permissions) = parse_octal_mode(&args.permission) else {
        eprintln!("lircd: invalid mode {}", args.permission);
        std::process::exit(1);
    };
    if let Err(error) = init_logging(level, args.logfile.as_deref()) {
        eprintln!("lircd: cannot open log file: {error}");
        std::process::exit(1);
    }

    let config = RuntimeConfig {
        client_socket_path: args.output,
        client_socket_permissions: permissions,
        pidfile_path: args.pidfile,
        nodaemon: args.nodaemon,
        allow_simulate: args.allow_simulate,
        ..RuntimeConfig::default()
    };
    if let Err(error) = app::run(config) {
        eprintln!("lircd: {error}");
        std::process::exit(1);
    }
}

fn parse_octal_mode(input: &str) -> Option<u32> {
    u32::from_str_radix(input, 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
}

fn parse_loglevel(input: &str) -> Option<Level> {
    match input.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "notice" | "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn init_logging(level: Level, logfile: Option<&Path>) -> std::io::Result<()> {
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            FmtSubscriber::builder()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            FmtSubscriber::builder().with_max_level(level).init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_loglevel, parse_octal_mode};
    use googletest::prelude::*;
    use rstest::rstest;
    use tracing::Level;

    #[rstest]
    #[case("666", Some(0o666))]
    #[case("640", Some(0o640))]
    #[case("8", None)]
    #[case("7777", None)]
    #[case("rw", None)]
    fn octal_modes_are_validated(#[case] input: &str, #[case] expected: Option<u32>) {
        assert_that!(parse_octal_mode(input), eq(expected));
    }

    #[rstest]
    #[case("info", Some(Level::INFO))]
    #[case("NOTICE", Some(Level::INFO))]
    #[case("Warning", Some(Level::WARN))]
    #[case("trace", Some(Level::TRACE))]
    #[case("loud", None)]
    fn loglevel_names_are_mapped(#[case] input: &str, #[case] expected: Option<Level>) {
        assert_that!(parse_loglevel(input), eq(expected));
    }
}
