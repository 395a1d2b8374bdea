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

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::framing::FramerKind;
use crate::websocket::WebSocketConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// 0 means unlimited
    pub max_connection: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 9092,
            max_connection: 0,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| AppError::InvalidValue(format!("network ip: {}", self.ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FramingConfig {
    pub framer: FramerKind,
    pub max_message_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        FramingConfig {
            framer: FramerKind::LengthPrefix,
            max_message_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// rolling log file directory, stdout only when unset
    pub dir: Option<String>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            dir: None,
            file_prefix: "stonewire.log".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub framing: FramingConfig,
    pub websocket: WebSocketConfig,
    pub log: LogConfig,
}

impl ServerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    fn validate(&self) -> AppResult<()> {
        self.network.socket_addr()?;
        if self.framing.max_message_size == 0 {
            return Err(AppError::InvalidValue(
                "framing.max_message_size must be positive".to_string(),
            ));
        }
        if self.websocket.max_handshake_size == 0 || self.websocket.max_message_size == 0 {
            return Err(AppError::InvalidValue(
                "websocket size limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
