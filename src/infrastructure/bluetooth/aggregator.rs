//! Status aggregation over one session.
//!
//! A full snapshot needs one reply of each [`StatusRequest`] kind. Requests
//! are sent strictly one at a time; the unit drops a request that arrives
//! while it is still answering the previous one.

use crate::domain::error::VisionAirError;
use crate::domain::models::{DeviceStatus, PartialStatus};
use crate::infrastructure::bluetooth::protocol::{decode_reply, encode_status_request, StatusRequest};
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::transport::GattLink;
use tracing::{debug, trace};

/// Send each request of `order` and merge the replies.
pub async fn aggregate<L: GattLink>(
    session: &mut Session<L>,
    order: &[StatusRequest],
) -> Result<PartialStatus, VisionAirError> {
    let mut acc = PartialStatus::default();
    for &kind in order {
        request_into(session, kind, &mut acc).await?;
    }
    Ok(acc)
}

/// Fill every field `seed` lacks and build the snapshot.
///
/// Request kinds whose fields are already present in `seed` are skipped.
pub async fn complete<L: GattLink>(
    session: &mut Session<L>,
    seed: PartialStatus,
) -> Result<DeviceStatus, VisionAirError> {
    let mut acc = seed;
    for kind in StatusRequest::ALL {
        if kind.is_satisfied_by(&acc) {
            trace!(?kind, "Already covered");
            continue;
        }
        request_into(session, kind, &mut acc).await?;
    }
    acc.into_status()
}

/// Poll a complete snapshot.
pub async fn fetch_status<L: GattLink>(
    session: &mut Session<L>,
) -> Result<DeviceStatus, VisionAirError> {
    complete(session, PartialStatus::default()).await
}

async fn request_into<L: GattLink>(
    session: &mut Session<L>,
    kind: StatusRequest,
    acc: &mut PartialStatus,
) -> Result<(), VisionAirError> {
    let reply = session.exchange(&encode_status_request(kind)).await?;
    let partial = decode_reply(&reply)?;

    if reply.get(2) != Some(&kind.reply_tag()) {
        debug!(
            address = %session.address(),
            ?kind,
            tag = ?reply.get(2),
            "Reply does not match request"
        );
    }

    acc.merge(partial);
    Ok(())
}
