// SPDX-License-Identifier: MIT

use clap::Parser;
use runner_daemon::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    runner_daemon::init_tracing(&cli);

    match runner_daemon::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "runner-daemon exited with an error");
            std::process::exit(1);
        }
    }
}
