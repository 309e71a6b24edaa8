//! BLE Session Module
//!
//! Scoped, exclusive access to the radio link of one device.
//!
//! A VisionAir unit accepts a single connection at a time, so every poll and
//! command goes through [`Connector::with_session`]. Callers for the same
//! address queue in FIFO order, and the link is always disconnected before the
//! next caller gets it, including when the operation errors, times out or is
//! dropped.

use crate::domain::error::{TransportError, VisionAirError};
use crate::domain::models::DeviceAddress;
use crate::domain::settings::LinkTimeouts;
use crate::infrastructure::bluetooth::transport::{BleAdapter, GattLink};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Opens sessions on behalf of any number of coordinators sharing one adapter.
pub struct Connector<A: BleAdapter> {
    adapter: A,
    timeouts: LinkTimeouts,
    // One FIFO lock per device address
    links: Mutex<HashMap<DeviceAddress, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A: BleAdapter> Connector<A> {
    pub fn new(adapter: A, timeouts: LinkTimeouts) -> Self {
        Self {
            adapter,
            timeouts,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn link_lock(&self, address: DeviceAddress) -> Arc<tokio::sync::Mutex<()>> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.entry(address).or_default().clone()
    }

    /// Run `body` with a live session to `address`.
    ///
    /// Waits for any session already open on the same address. Time spent
    /// waiting does not count against the operation timeout; connecting,
    /// `body` and disconnecting do.
    pub async fn with_session<T, F>(
        &self,
        address: DeviceAddress,
        body: F,
    ) -> Result<T, VisionAirError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Session<A::Link>) -> BoxFuture<'s, Result<T, VisionAirError>>
            + Send,
    {
        let permit = self.link_lock(address).lock_owned().await;
        let operation = self.timeouts.operation();

        match tokio::time::timeout(operation, self.run_session(address, permit, body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%address, ?operation, "Operation timed out, tearing down session");
                Err(VisionAirError::LinkTimeout { timeout: operation })
            }
        }
    }

    async fn run_session<T, F>(
        &self,
        address: DeviceAddress,
        permit: OwnedMutexGuard<()>,
        body: F,
    ) -> Result<T, VisionAirError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Session<A::Link>) -> BoxFuture<'s, Result<T, VisionAirError>>
            + Send,
    {
        debug!(%address, "Connecting");
        let connect_timeout = self.timeouts.connect();
        let link = match tokio::time::timeout(connect_timeout, self.adapter.connect(address)).await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                let reason = match e {
                    TransportError::NotFound(reason) => reason,
                    other => other.to_string(),
                };
                info!(%address, %reason, "Device unreachable");
                return Err(VisionAirError::DeviceUnreachable { address, reason });
            }
            Err(_) => {
                info!(%address, "Connection attempt timed out");
                return Err(VisionAirError::LinkTimeout {
                    timeout: connect_timeout,
                });
            }
        };

        let mut session = Session {
            address,
            link: Some(link),
            permit: Some(permit),
            response_timeout: self.timeouts.response(),
            exchanges: 0,
        };

        let result = body(&mut session).await;
        session.close().await;
        result
    }
}

/// A live link to one device. Only obtainable through [`Connector::with_session`].
pub struct Session<L: GattLink> {
    address: DeviceAddress,
    link: Option<L>,
    permit: Option<OwnedMutexGuard<()>>,
    response_timeout: Duration,
    exchanges: usize,
}

impl<L: GattLink> Session<L> {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Number of request/reply exchanges performed so far.
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    /// Write one request and wait for the next notification.
    pub async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, VisionAirError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| VisionAirError::from_link(TransportError::Closed))?;

        self.exchanges += 1;
        link.write_request(request)
            .await
            .map_err(VisionAirError::from_link)?;

        match tokio::time::timeout(self.response_timeout, link.next_notification()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(VisionAirError::from_link(e)),
            Err(_) => {
                debug!(address = %self.address, timeout = ?self.response_timeout, "No reply");
                Err(VisionAirError::LinkTimeout {
                    timeout: self.response_timeout,
                })
            }
        }
    }

    async fn close(&mut self) {
        // The link stays in place until the disconnect finishes so that a
        // cancelled close is finished off by Drop.
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.disconnect().await {
                warn!(address = %self.address, error = %e, "Disconnect failed");
            }
        }
        self.link = None;
        self.permit = None;
        debug!(address = %self.address, exchanges = self.exchanges, "Session closed");
    }
}

impl<L: GattLink> Drop for Session<L> {
    fn drop(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        let permit = self.permit.take();
        let address = self.address;

        // Abandoned mid-operation: disconnect in the background and only then
        // hand the link to the next caller.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = link.disconnect().await {
                        warn!(%address, error = %e, "Disconnect of abandoned session failed");
                    }
                    drop(permit);
                    debug!(%address, "Abandoned session torn down");
                });
            }
            Err(_) => warn!(%address, "No runtime to disconnect abandoned session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::{FakeAdapter, FakeDevice};
    use crate::infrastructure::bluetooth::protocol::{encode_status_request, StatusRequest};
    use futures::FutureExt;
    use std::sync::atomic::Ordering;

    fn address() -> DeviceAddress {
        "00:1A:7D:DA:71:13".parse().unwrap()
    }

    #[tokio::test]
    async fn test_session_disconnects_after_body() {
        let device = FakeDevice::new();
        let connector = Connector::new(FakeAdapter::new(device.clone()), LinkTimeouts::default());

        let reply = connector
            .with_session(address(), |session| {
                async move {
                    session
                        .exchange(&encode_status_request(StatusRequest::RemoteSensor))
                        .await
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(reply[2], 0x04);
        assert_eq!(device.open_sessions.load(Ordering::SeqCst), 0);
        assert_eq!(device.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_disconnects_after_error() {
        let device = FakeDevice::new();
        let connector = Connector::new(FakeAdapter::new(device.clone()), LinkTimeouts::default());

        let result: Result<(), _> = connector
            .with_session(address(), |_session| {
                async move { Err(VisionAirError::LinkError("boom".into())) }.boxed()
            })
            .await;

        assert_eq!(result, Err(VisionAirError::LinkError("boom".into())));
        assert_eq!(device.open_sessions.load(Ordering::SeqCst), 0);
        assert_eq!(device.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        let device = FakeDevice::new();
        device.set_reachable(false);
        let connector = Connector::new(FakeAdapter::new(device.clone()), LinkTimeouts::default());

        let result: Result<(), _> = connector
            .with_session(address(), |_session| async move { Ok(()) }.boxed())
            .await;

        assert!(matches!(
            result,
            Err(VisionAirError::DeviceUnreachable { .. })
        ));
        assert_eq!(device.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out_and_releases_link() {
        let device = FakeDevice::new();
        device.set_silent(true);
        let timeouts = LinkTimeouts {
            connect_ms: 1_000,
            response_ms: 2_000,
            operation_ms: 10_000,
        };
        let connector = Connector::new(FakeAdapter::new(device.clone()), timeouts);

        for _ in 0..2 {
            let result = connector
                .with_session(address(), |session| {
                    async move {
                        session
                            .exchange(&encode_status_request(StatusRequest::DeviceState))
                            .await
                    }
                    .boxed()
                })
                .await;
            assert_eq!(
                result,
                Err(VisionAirError::LinkTimeout {
                    timeout: Duration::from_secs(2)
                })
            );
        }
        assert_eq!(device.max_open_sessions.load(Ordering::SeqCst), 1);
        assert_eq!(device.open_sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_tears_down_session() {
        let device = FakeDevice::new();
        let timeouts = LinkTimeouts {
            connect_ms: 1_000,
            response_ms: 2_000,
            operation_ms: 3_000,
        };
        let connector = Connector::new(FakeAdapter::new(device.clone()), timeouts);

        let result: Result<(), _> = connector
            .with_session(address(), |_session| {
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                .boxed()
            })
            .await;
        assert_eq!(
            result,
            Err(VisionAirError::LinkTimeout {
                timeout: Duration::from_secs(3)
            })
        );

        // The abandoned session is torn down in the background before the
        // next caller gets the link.
        let reply = connector
            .with_session(address(), |session| {
                async move {
                    assert_eq!(session.exchanges(), 0);
                    session
                        .exchange(&encode_status_request(StatusRequest::ProbeSensors))
                        .await
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(reply[2], 0x03);
        assert_eq!(device.max_open_sessions.load(Ordering::SeqCst), 1);
        assert_eq!(device.disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sessions_are_serialized() {
        let device = FakeDevice::new();
        device.set_reply_delay(Duration::from_millis(300));
        let connector = Arc::new(Connector::new(
            FakeAdapter::new(device.clone()),
            LinkTimeouts::default(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let connector = connector.clone();
            tasks.push(tokio::spawn(async move {
                connector
                    .with_session(address(), |session| {
                        async move {
                            session
                                .exchange(&encode_status_request(StatusRequest::DeviceState))
                                .await
                        }
                        .boxed()
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(device.connects.load(Ordering::SeqCst), 4);
        assert_eq!(device.max_open_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_sessions_run_in_arrival_order() {
        let device = FakeDevice::new();
        device.set_reply_delay(Duration::from_millis(300));
        let connector = Arc::new(Connector::new(
            FakeAdapter::new(device.clone()),
            LinkTimeouts::default(),
        ));
        let served = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for caller in 0..5 {
            let connector = connector.clone();
            let served = served.clone();
            tasks.push(tokio::spawn(async move {
                connector
                    .with_session(address(), move |session| {
                        async move {
                            served.lock().unwrap().push(caller);
                            session
                                .exchange(&encode_status_request(StatusRequest::DeviceState))
                                .await
                        }
                        .boxed()
                    })
                    .await
            }));
            // Let this caller queue up before the next one arrives
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(*served.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(device.max_open_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_devices_do_not_wait_for_each_other() {
        let device = FakeDevice::new();
        device.set_reply_delay(Duration::from_secs(2));
        let connector = Arc::new(Connector::new(
            FakeAdapter::new(device.clone()),
            LinkTimeouts::default(),
        ));
        let addresses: [DeviceAddress; 2] = [
            "00:1A:7D:DA:71:13".parse().unwrap(),
            "00:1A:7D:DA:71:14".parse().unwrap(),
        ];

        let started = tokio::time::Instant::now();
        let mut tasks = Vec::new();
        for address in addresses {
            let connector = connector.clone();
            tasks.push(tokio::spawn(async move {
                connector
                    .with_session(address, |session| {
                        async move {
                            session
                                .exchange(&encode_status_request(StatusRequest::RemoteSensor))
                                .await
                        }
                        .boxed()
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        // One exchange worth of time, not two
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(device.max_open_sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_discovery_goes_through_adapter() {
        use crate::domain::models::ScannedDevice;

        let unit = ScannedDevice {
            name: "VisionAir 0142".to_string(),
            address: address(),
            signal_strength: -70,
        };
        let adapter = FakeAdapter::new(FakeDevice::new()).with_advertised(vec![unit.clone()]);
        let connector = Connector::new(adapter, LinkTimeouts::default());

        let found = connector
            .adapter()
            .discover(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, vec![unit]);
    }
}
