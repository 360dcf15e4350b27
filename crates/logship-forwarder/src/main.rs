// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use logship::{logger::Formatter, Agent, Config, Severity};

const STDIN_CATEGORY: &str = "Stdin";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let agent = Config::from_env().and_then(Agent::new);

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");

    #[allow(clippy::expect_used)]
    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(Formatter)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        );

    let capture_layer = agent.as_ref().ok().map(Agent::layer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(capture_layer)
        .init();

    let agent = match agent {
        Ok(agent) => agent,
        Err(e) => {
            error!("Unable to start log forwarder: {e}");
            return;
        }
    };

    debug!("Logging subsystem enabled");
    agent.start();

    let cancel = agent.cancellation_token();
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                info!("Shutdown requested, flushing remaining logs");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !line.is_empty() {
                        agent.log(Severity::Log, STDIN_CATEGORY, line);
                    }
                }
                Ok(None) => {
                    debug!("Input closed, flushing remaining logs");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {e}");
                    break;
                }
            }
        }
    }

    agent.shutdown().await;
}
