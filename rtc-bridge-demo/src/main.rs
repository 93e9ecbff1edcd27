//! rtc-bridge demo
//!
//! Runs a loopback call between two bridge sessions: local media
//! acquisition, offer/answer, trickle ICE and a data channel.
// Copyright 2025 Francisco F. Pinochet
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


mod scenario;

use anyhow::Result;
use rtc_bridge_config::{BridgeConfig, LogFormat};
use rtc_bridge_logging::{init_console_logging, init_logging};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = BridgeConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    match config.log_format {
        LogFormat::Json => init_logging("rtc-bridge-demo", config.log_level()),
        LogFormat::Console => init_console_logging("rtc-bridge-demo", config.log_level()),
    }

    info!(
        ice_servers = config.rtc_configuration().ice_servers.len(),
        channel_id_base = config.channel_id_base,
        negotiation_timeout = ?config.negotiation_timeout(),
        "Configuration loaded"
    );

    let summary = scenario::run(&config).await?;

    info!(
        caller_state = ?summary.caller_state,
        callee_state = ?summary.callee_state,
        candidates = summary.candidates_exchanged,
        messages = summary.messages_sent,
        "Loopback call finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary.stats)?);

    Ok(())
}
