// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use stonewire::service::setup_local_tracing_with_level;
use stonewire::{setup_tracing, AppResult, Server, ServerConfig};
use tokio::{runtime, signal};
use tracing::{error, info};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// print the effective configuration and exit
    PrintConfig,
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> AppResult<()> {
    // 加载 .env 文件
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let server_config = ServerConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", server_config);
        return Ok(());
    }

    let directive = default_directive(commandline.verbose);
    // keep the guard alive until exit, it flushes the log file
    let _log_guard = match &server_config.log.dir {
        Some(dir) => Some(setup_tracing(dir, &server_config.log.file_prefix, directive)?),
        None => {
            setup_local_tracing_with_level(directive)?;
            None
        }
    };

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let server = Server::new(server_config);
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
    };
    rt.block_on(server.run(shutdown, |addr| info!("stonewire ready on {}", addr)))?;
    info!("stonewire shutdown complete");
    Ok(())
}
