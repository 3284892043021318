// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `quarryd`: the filesystem-watcher daemon and its control commands.
//!
//! Usage: `quarryd <run|stop|status|query|flush> [worktree] [since-token]`

use std::path::PathBuf;
use std::process::ExitCode;

use quarry_daemon::{client, run, DaemonConfig, WatchError};
use quarry_ipc::ActiveState;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("usage: quarryd <run|stop|status|query|flush> [worktree] [since-token]");
        return ExitCode::from(2);
    };
    let worktree = args
        .get(1)
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    init_logging(&worktree, command);

    let config = match DaemonConfig::discover(&worktree) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("quarryd: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result: Result<ExitCode, WatchError> = match command {
        "run" => run(&config).map(|()| ExitCode::SUCCESS),
        "stop" => client::stop(&config.gitdir).map(|()| ExitCode::SUCCESS),
        "status" => Ok(report_status(&config)),
        "query" => {
            let since = args.get(2).map(String::as_str).unwrap_or("");
            client::query(&config.gitdir, since).map(|reply| {
                if reply.trivial {
                    println!("/");
                } else {
                    for path in &reply.paths {
                        println!("{path}");
                    }
                }
                println!("{}", reply.token);
                ExitCode::SUCCESS
            })
        }
        "flush" => client::flush(&config.gitdir).map(|()| ExitCode::SUCCESS),
        other => {
            eprintln!("quarryd: unknown command {other:?}");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("quarryd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn report_status(config: &DaemonConfig) -> ExitCode {
    match client::status(&config.gitdir) {
        ActiveState::Listening => {
            println!("watcher daemon is watching {:?}", config.worktree);
            ExitCode::SUCCESS
        }
        _ => {
            println!("no watcher daemon is watching {:?}", config.worktree);
            ExitCode::FAILURE
        }
    }
}

/// `run` logs to a rolling file inside the gitdir (the daemon has no
/// terminal); control commands log to stderr. `QUARRY_LOG` filters both.
fn init_logging(worktree: &std::path::Path, command: &str) {
    let filter = EnvFilter::try_from_env("QUARRY_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = worktree.join(".git").join("quarry-watch");
    if command == "run" && std::fs::create_dir_all(&log_dir).is_ok() {
        let appender = tracing_appender::rolling::never(log_dir, "daemon.log");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(appender)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
