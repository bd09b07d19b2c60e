//! Command-line surface (spec §1: "explicitly out of scope... minimal"). A
//! handful of flags mirroring `original_source/src/cmd/root.go`'s
//! `pod-max-wait`/`pod-shell`/etc, taking precedence over both the config
//! file and environment (SPEC_FULL §6.1).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "runner-daemon", about = "Distributed job runner")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run exactly one job read from this YAML file, then exit (spec §6.2).
    #[arg(long)]
    pub job_file: Option<PathBuf>,

    #[arg(long)]
    pub pod_shell: Option<String>,

    #[arg(long)]
    pub poll_interval: Option<u64>,

    #[arg(long)]
    pub concurrency: Option<i64>,

    #[arg(long)]
    pub api_token: Option<String>,

    #[arg(long)]
    pub metrics_port: Option<u16>,

    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
