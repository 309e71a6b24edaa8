//! Command execution.
//!
//! A command is written once; its acknowledgement (a device state reply) seeds
//! the snapshot, and the remaining status kinds are fetched in the same
//! session.

use crate::domain::error::VisionAirError;
use crate::domain::models::{Command, DeviceAddress, DeviceStatus};
use crate::infrastructure::bluetooth::aggregator;
use crate::infrastructure::bluetooth::protocol::{decode_reply, encode_command};
use crate::infrastructure::bluetooth::session::Connector;
use crate::infrastructure::bluetooth::transport::BleAdapter;
use futures::FutureExt;
use tracing::{info, warn};

/// Send `command` to `address` and return the resulting snapshot.
///
/// Out-of-range parameters fail with [`VisionAirError::InvalidCommand`]
/// before the link is touched. A snapshot that contradicts the command fails
/// with [`VisionAirError::CommandNotApplied`].
pub async fn execute<A: BleAdapter>(
    connector: &Connector<A>,
    address: DeviceAddress,
    command: Command,
) -> Result<DeviceStatus, VisionAirError> {
    let frame = encode_command(&command)?;

    let status = connector
        .with_session(address, move |session| {
            async move {
                let ack = session.exchange(&frame).await?;
                let seed = decode_reply(&ack)?;
                aggregator::complete(session, seed).await
            }
            .boxed()
        })
        .await?;

    if !command.is_reflected_in(&status) {
        warn!(%address, %command, "Device did not apply command");
        return Err(VisionAirError::CommandNotApplied {
            command: command.to_string(),
        });
    }

    info!(%address, %command, "Command applied");
    Ok(status)
}
