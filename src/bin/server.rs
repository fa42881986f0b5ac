// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI entry point: loads configuration, replays the append-only log, and
//! runs the event loop until a signal requests shutdown.

use clap::Parser;
use respkv::config::Config;
use respkv::server::Server;
use respkv::stop_signal::StopSignal;
use std::net::SocketAddr;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "respkv-server", about = "A RESP-compatible in-memory key-value store")]
struct Args {
    /// Path to a `redis.conf`-style configuration file.
    config_path: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env().init();

    let args = Args::parse();
    let config = match &args.config_path {
        Some(path) => Config::from_file(path),
        None => Config::default(),
    };

    let addr: SocketAddr = match format!("0.0.0.0:{}", config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("invalid listen port {}: {e}", config.port);
            return ExitCode::FAILURE;
        }
    };

    let stop = StopSignal::default();
    let mut server = match Server::bind(addr, config, stop) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.replay() {
        log::error!("failed to replay append-only log: {e}");
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("server loop exited with an error: {e}");
            ExitCode::FAILURE
        }
    }
}
