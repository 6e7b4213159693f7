// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generation-aware connection routing.
//!
//! The [`ProtocolRouter`] turns an identifier into an open [`Connection`] of
//! the right dialect, runs caller code against it and releases it on every
//! exit path. It also provides "auto" reads that try the likely generation
//! first and fall back to the other one once.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelly_onboard::registry::MemoryRegistry;
//! use shelly_onboard::resolver::GenerationResolver;
//! use shelly_onboard::router::ProtocolRouter;
//!
//! # async fn example() -> shelly_onboard::Result<()> {
//! let resolver = Arc::new(GenerationResolver::new(Arc::new(MemoryRegistry::new())));
//! let router = ProtocolRouter::new(resolver);
//!
//! let model = router
//!     .with_device("192.168.1.40", |conn| Box::pin(async move {
//!         Ok::<_, shelly_onboard::Error>(conn.info().await?.model)
//!     }))
//!     .await?;
//! println!("{model}");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::Error;
use crate::protocol::{Connection, DeviceInfo, Gen1Client, Gen2Client, HttpConfig};
use crate::resolver::GenerationResolver;

/// Default number of devices handled concurrently by
/// [`ProtocolRouter::with_devices`].
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default request timeout of routed connections.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Keeps the open-connection count honest.
///
/// Dropping the guard closes the connection, including while unwinding from
/// a panicking callback.
struct ConnectionGuard {
    open: Arc<AtomicUsize>,
    connection: Option<Connection>,
}

impl ConnectionGuard {
    fn new(open: &Arc<AtomicUsize>, connection: Connection) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
            connection: Some(connection),
        }
    }

    fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Routes operations to Gen1 or Gen2+ connections.
pub struct ProtocolRouter {
    resolver: Arc<GenerationResolver>,
    request_timeout: Duration,
    concurrency: usize,
    open: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ProtocolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRouter")
            .field("request_timeout", &self.request_timeout)
            .field("concurrency", &self.concurrency)
            .field("open_connections", &self.open_connections())
            .finish_non_exhaustive()
    }
}

impl ProtocolRouter {
    /// Creates a router resolving identifiers through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<GenerationResolver>) -> Self {
        Self {
            resolver,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the request timeout of routed connections.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default fan-out width of [`with_devices`](Self::with_devices).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the default fan-out width.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<GenerationResolver> {
        &self.resolver
    }

    /// Returns the number of connections currently open through this router.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Resolves `identifier`, opens a connection of the matching dialect
    /// and runs `f` against it.
    ///
    /// The generation is taken from the registry or the resolver cache and
    /// probed only when unknown. The connection is released whether `f`
    /// succeeds, fails or panics.
    ///
    /// # Errors
    ///
    /// Returns a resolution error, a connection setup error, or the error
    /// returned by `f`.
    pub async fn with_device<T, F>(&self, identifier: &str, f: F) -> Result<T, Error>
    where
        F: for<'a> FnOnce(&'a Connection) -> BoxFuture<'a, Result<T, Error>>,
    {
        let device = self.resolver.resolve_with_generation(identifier).await?;
        let connection = Connection::open(
            device.http_config(self.request_timeout),
            device.generation,
        )?;

        tracing::debug!(
            device = %identifier,
            address = %device.address,
            generation = %device.generation,
            "Opened device connection"
        );

        let guard = ConnectionGuard::new(&self.open, connection);
        let Some(connection) = guard.connection() else {
            return Err(crate::error::ProtocolError::Closed.into());
        };
        f(connection).await
    }

    /// Runs `f` against every device in `identifiers`, at most
    /// `concurrency` at a time (`0` selects the router default).
    ///
    /// `f` receives the identifier and the open connection.
    ///
    /// Every device is attempted; a failure does not cancel peers already
    /// dispatched. If any device fails, the first failure observed is
    /// returned after all devices have finished.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered across all devices.
    pub async fn with_devices<S, F>(
        &self,
        identifiers: &[S],
        concurrency: usize,
        f: F,
    ) -> Result<(), Error>
    where
        S: AsRef<str> + Sync,
        F: for<'a> Fn(String, &'a Connection) -> BoxFuture<'a, Result<(), Error>> + Sync,
    {
        let width = if concurrency == 0 {
            self.concurrency
        } else {
            concurrency
        };
        let semaphore = Semaphore::new(width);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let failures = AtomicUsize::new(0);

        let tasks = identifiers.iter().map(|identifier| {
            let identifier = identifier.as_ref();
            let semaphore = &semaphore;
            let first_error = &first_error;
            let failures = &failures;
            let f = &f;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                let result = self
                    .with_device(identifier, |conn| f(identifier.to_string(), conn))
                    .await;
                if let Err(e) = result {
                    tracing::warn!(device = %identifier, error = %e, "Device operation failed");
                    failures.fetch_add(1, Ordering::Relaxed);
                    first_error.lock().get_or_insert(e);
                }
            }
        });

        join_all(tasks).await;

        match first_error.into_inner() {
            Some(e) => {
                tracing::debug!(
                    failed = failures.load(Ordering::Relaxed),
                    total = identifiers.len(),
                    "Fan-out finished with failures"
                );
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Runs a read with generation fallback.
    ///
    /// A device cached as Gen1 is tried with `gen1_op` first; any other
    /// device (Gen2+ or unknown) with `gen2_op` first. If the first attempt
    /// fails, the other generation is tried exactly once. If both fail, the
    /// error of the first attempt is returned.
    ///
    /// # Errors
    ///
    /// Returns a resolution error or the first attempt's error.
    pub async fn auto_route<T, G1, F1, G2, F2>(
        &self,
        identifier: &str,
        gen1_op: G1,
        gen2_op: G2,
    ) -> Result<T, Error>
    where
        G1: FnOnce(Gen1Client) -> F1,
        F1: Future<Output = Result<T, Error>>,
        G2: FnOnce(Gen2Client) -> F2,
        F2: Future<Output = Result<T, Error>>,
    {
        let device = self.resolver.resolve(identifier).await?;
        let config = device.http_config(self.request_timeout);

        if device.generation.is_gen1() {
            match self.run_gen1(config.clone(), gen1_op).await {
                Ok(value) => Ok(value),
                Err(first) => {
                    tracing::debug!(device = %identifier, error = %first, "Gen1 read failed, trying Gen2");
                    self.run_gen2(config, gen2_op).await.or(Err(first))
                }
            }
        } else {
            match self.run_gen2(config.clone(), gen2_op).await {
                Ok(value) => Ok(value),
                Err(first) => {
                    tracing::debug!(device = %identifier, error = %first, "Gen2 read failed, trying Gen1");
                    self.run_gen1(config, gen1_op).await.or(Err(first))
                }
            }
        }
    }

    /// Returns the full status of a device with generation fallback.
    ///
    /// # Errors
    ///
    /// See [`auto_route`](Self::auto_route).
    pub async fn auto_status(&self, identifier: &str) -> Result<Value, Error> {
        self.auto_route(
            identifier,
            |client| async move { client.status().await },
            |client| async move { client.get_status().await },
        )
        .await
    }

    /// Returns the identity of a device with generation fallback.
    ///
    /// # Errors
    ///
    /// See [`auto_route`](Self::auto_route).
    pub async fn auto_info(&self, identifier: &str) -> Result<DeviceInfo, Error> {
        self.auto_route(
            identifier,
            |client| async move { client.info().await },
            |client| async move { client.info().await },
        )
        .await
    }

    async fn run_gen1<T, G, F>(&self, config: HttpConfig, op: G) -> Result<T, Error>
    where
        G: FnOnce(Gen1Client) -> F,
        F: Future<Output = Result<T, Error>>,
    {
        let client = Gen1Client::new(config)?;
        let _guard = ConnectionGuard::new(&self.open, Connection::Gen1(client.clone()));
        op(client).await
    }

    async fn run_gen2<T, G, F>(&self, config: HttpConfig, op: G) -> Result<T, Error>
    where
        G: FnOnce(Gen2Client) -> F,
        F: Future<Output = Result<T, Error>>,
    {
        let client = Gen2Client::new(config)?;
        let _guard = ConnectionGuard::new(&self.open, Connection::Gen2(client.clone()));
        op(client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::registry::{MemoryRegistry, RegisteredDevice};
    use crate::types::Generation;

    fn router_with(devices: Vec<RegisteredDevice>) -> ProtocolRouter {
        let registry = Arc::new(MemoryRegistry::with_devices(devices));
        ProtocolRouter::new(Arc::new(GenerationResolver::new(registry)))
    }

    #[test]
    fn default_concurrency() {
        let router = router_with(vec![]);
        assert_eq!(router.concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(router.with_concurrency(0).concurrency(), 1);
    }

    #[tokio::test]
    async fn with_device_dispatches_on_generation() {
        let router = router_with(vec![
            RegisteredDevice::new("old", "10.0.0.1").with_generation(Generation::Gen1),
            RegisteredDevice::new("new", "10.0.0.2").with_generation(Generation::Gen2Plus(2)),
        ]);

        let gen1 = router
            .with_device("old", |conn| Box::pin(async move { Ok::<_, Error>(conn.is_gen1()) }))
            .await
            .unwrap();
        let gen2 = router
            .with_device("new", |conn| Box::pin(async move { Ok::<_, Error>(conn.is_gen2()) }))
            .await
            .unwrap();

        assert!(gen1);
        assert!(gen2);
        assert_eq!(router.open_connections(), 0);
    }

    #[tokio::test]
    async fn with_device_releases_on_error() {
        let router = router_with(vec![
            RegisteredDevice::new("old", "10.0.0.1").with_generation(Generation::Gen1),
        ]);

        let result: Result<(), Error> = router
            .with_device("old", |_| {
                Box::pin(async { Err::<(), _>(Error::from(ProtocolError::AuthenticationFailed)) })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(router.open_connections(), 0);
    }

    async fn explode(_conn: &Connection) -> Result<(), Error> {
        panic!("callback exploded")
    }

    #[tokio::test]
    async fn with_device_releases_on_panic() {
        let router = Arc::new(router_with(vec![
            RegisteredDevice::new("old", "10.0.0.1").with_generation(Generation::Gen1),
        ]));

        let task_router = Arc::clone(&router);
        let handle = tokio::spawn(async move {
            task_router
                .with_device("old", |conn| Box::pin(explode(conn)))
                .await
        });

        let joined = handle.await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(router.open_connections(), 0);
    }

    #[tokio::test]
    async fn with_device_unknown_name() {
        let router = router_with(vec![]);
        let result = router
            .with_device("ghost", |_| Box::pin(async { Ok::<_, Error>(()) }))
            .await;
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    }
}
