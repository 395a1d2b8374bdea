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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// framing errors, fatal to the stream they occur on
    #[error("message of length {size} exceeds the maximum of {max}")]
    OversizeMessage { size: u64, max: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// transport errors
    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// api misuse
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl AppError {
    /// Whether the error poisons the byte stream it was raised on.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            AppError::OversizeMessage { .. } | AppError::MalformedFrame(_)
        )
    }
}
