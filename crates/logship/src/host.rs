// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identification sent with the authentication handshake.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Kind of process producing the logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostType {
    #[default]
    Client,
    Server,
    Editor,
    Game,
}

impl HostType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HostType::Client => "Client",
            HostType::Server => "Server",
            HostType::Editor => "Editor",
            HostType::Game => "Game",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(HostType::Client),
            "server" => Ok(HostType::Server),
            "editor" => Ok(HostType::Editor),
            "game" => Ok(HostType::Game),
            _ => Err(format!("unknown host type '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for HostType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Platform identifier for the current build target.
#[must_use]
pub fn platform() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Win64",
        "linux" => "Linux",
        "macos" => "Mac",
        _ => "Unknown",
    }
}
