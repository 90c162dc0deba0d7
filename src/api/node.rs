//! Node implementation - the serving side of the bootstrap protocol
//!
//! A [`Node`] owns a [`SecureListener`]. Each accepted connection is served
//! on its own task: TLS handshake, then the advertisement, then one
//! PeerSession (if a responder is configured), then close.
//! Connection tasks live in a `JoinSet` and share only read-only state, so
//! stopping the node cancels and joins every one of them.

use crate::api::config::{AdvertisePolicy, NodeConfig};
use crate::api::config_file::NodeConfigFile;
use crate::api::events::{Event, EventHandlers, SubscriptionHandle};
use crate::bootstrap::BootnodeHandshake;
use crate::error::{BootstrapError, ConfigError, NetworkError, Result};
use crate::network::{CertificateMaterial, PendingConnection, SecureListener, TransportConfig};
use crate::protocol::{encode_advertisement, Endpoint};
use crate::session::{PeerSession, Responder};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Current operational state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node has been created but not started
    Created,
    /// Node is binding its listener
    Starting,
    /// Node is accepting connections
    Running,
    /// Node is shutting down gracefully
    Stopping,
    /// Node has stopped
    Stopped,
}

/// Builder for creating Node instances with progressive configuration
///
/// # Examples
///
/// ```no_run
/// use p2p_bootstrap::api::NodeBuilder;
/// use p2p_bootstrap::network::CertificateMaterial;
/// use p2p_bootstrap::session::EchoResponder;
///
/// # async fn example() -> p2p_bootstrap::Result<()> {
/// let mut node = NodeBuilder::new()
///     .with_bind_address("127.0.0.1:8080".parse().unwrap())
///     .with_certificate(CertificateMaterial::self_signed(&["localhost", "127.0.0.1"])?)
///     .advertise_endpoints(vec!["127.0.0.1:9000".parse()?])
///     .with_responder(EchoResponder)
///     .build()?;
///
/// node.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct NodeBuilder {
    config: NodeConfig,
    certificate: Option<CertificateMaterial>,
    responder: Option<Arc<dyn Responder>>,
}

impl NodeBuilder {
    /// Create a new NodeBuilder with default settings
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            certificate: None,
            responder: None,
        }
    }

    /// Start from a configuration file, loading its certificate material
    pub fn from_config_file(file: &NodeConfigFile) -> Result<Self> {
        file.validate()?;
        let material = file.certificate_material()?;
        let config = file.node_config(&material)?;

        Ok(Self {
            config,
            certificate: Some(material),
            responder: None,
        })
    }

    /// Set the address to listen on; port 0 picks a free port
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    /// Set the certificate presented to connecting peers
    pub fn with_certificate(mut self, material: CertificateMaterial) -> Self {
        self.certificate = Some(material);
        self
    }

    /// Replace the transport settings
    pub fn with_transport_config(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the advertisement policy
    pub fn with_advertise_policy(mut self, policy: AdvertisePolicy) -> Self {
        self.config.advertise = policy;
        self
    }

    /// Advertise exactly these endpoints, in order
    pub fn advertise_endpoints(self, endpoints: Vec<Endpoint>) -> Self {
        self.with_advertise_policy(AdvertisePolicy::Endpoints(endpoints))
    }

    /// Answer one PeerSession per connection with `responder`
    pub fn with_responder<R: Responder>(mut self, responder: R) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Set the maximum number of connections served at once
    pub fn with_max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Build the Node instance
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if no certificate was supplied or a value is
    /// out of range.
    pub fn build(self) -> Result<Node> {
        self.config.validate()?;

        let certificate = self
            .certificate
            .ok_or_else(|| ConfigError::MissingRequiredField {
                field: "certificate".to_string(),
            })?;

        Ok(Node {
            config: self.config,
            certificate,
            responder: self.responder,
            event_handlers: EventHandlers::new(),
            state: Arc::new(RwLock::new(NodeState::Created)),
            running: None,
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only state shared by every connection task
struct ServeContext {
    advertisement: Arc<[u8]>,
    advertised: usize,
    responder: Option<Arc<dyn Responder>>,
    events: EventHandlers,
    max_connections: usize,
}

struct Running {
    local_addr: SocketAddr,
    advertised: Vec<Endpoint>,
    shutdown: CancellationToken,
    accept_loop: JoinHandle<()>,
}

/// A bootnode or peer accepting bootstrap connections
///
/// # Examples
///
/// ```no_run
/// use p2p_bootstrap::api::{Event, NodeBuilder};
/// use p2p_bootstrap::network::CertificateMaterial;
///
/// # async fn example() -> p2p_bootstrap::Result<()> {
/// let mut node = NodeBuilder::new()
///     .with_certificate(CertificateMaterial::self_signed(&["localhost"])?)
///     .build()?;
///
/// node.on_event(|event| {
///     if let Event::PeerConnected { peer, .. } = event {
///         println!("peer {} connected", peer);
///     }
/// });
///
/// node.start().await?;
/// node.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    config: NodeConfig,
    certificate: CertificateMaterial,
    responder: Option<Arc<dyn Responder>>,
    event_handlers: EventHandlers,
    state: Arc<RwLock<NodeState>>,
    running: Option<Running>,
}

impl Node {
    /// Bind the listener and start accepting
    ///
    /// # Errors
    ///
    /// Returns an error if the node is already running, or if the listener
    /// cannot be bound (`BindFailed`, `CertificateInvalid`). A failed start
    /// leaves the node in its previous state.
    pub async fn start(&mut self) -> Result<()> {
        let previous = self.state();
        if previous != NodeState::Created && previous != NodeState::Stopped {
            return Err(ConfigError::InvalidValue {
                field: "state".to_string(),
                reason: format!("cannot start a node that is {:?}", previous),
            }
            .into());
        }

        *self.state.write() = NodeState::Starting;

        let listener = match SecureListener::bind(
            self.config.bind_address,
            &self.certificate,
            self.config.transport.clone(),
        )
        .await
        {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write() = previous;
                error!(address = %self.config.bind_address, error = %e, "failed to start node");
                return Err(e);
            },
        };

        let local_addr = listener.local_addr();
        let advertised = self.config.advertise.resolve(local_addr);
        let advertisement: Arc<[u8]> = encode_advertisement(&advertised).into();

        let context = Arc::new(ServeContext {
            advertisement,
            advertised: advertised.len(),
            responder: self.responder.clone(),
            events: self.event_handlers.clone(),
            max_connections: self.config.max_connections,
        });

        let shutdown = CancellationToken::new();
        let accept_loop = tokio::spawn(accept_loop(listener, context, shutdown.clone()));

        info!(
            address = %local_addr,
            advertised = ?advertised,
            "node started"
        );

        self.running = Some(Running {
            local_addr,
            advertised,
            shutdown,
            accept_loop,
        });
        *self.state.write() = NodeState::Running;

        self.event_handlers.dispatch(Event::Listening {
            address: local_addr,
            fingerprint: self.certificate.fingerprint(),
        });

        Ok(())
    }

    /// Stop the node gracefully
    ///
    /// Closes the listener, unblocks every pending send and receive, and waits
    /// for all connection tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not running.
    pub async fn stop(&mut self) -> Result<()> {
        let current = self.state();
        if current != NodeState::Running {
            return Err(ConfigError::InvalidValue {
                field: "state".to_string(),
                reason: format!("cannot stop a node that is {:?}", current),
            }
            .into());
        }

        *self.state.write() = NodeState::Stopping;

        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            if let Err(e) = running.accept_loop.await {
                error!(error = %e, "accept loop terminated abnormally");
            }
            info!(address = %running.local_addr, "node stopped");
        }

        *self.state.write() = NodeState::Stopped;
        self.event_handlers.dispatch(Event::NodeStopped);

        Ok(())
    }

    /// Get the current operational state
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Endpoint peers can dial to reach this node, while running
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.local_addr().map(Endpoint::from_socket_addr)
    }

    /// Endpoints sent to every peer, while running
    pub fn advertised_endpoints(&self) -> Option<&[Endpoint]> {
        self.running
            .as_ref()
            .map(|running| running.advertised.as_slice())
    }

    /// Certificate presented to peers
    pub fn certificate(&self) -> &CertificateMaterial {
        &self.certificate
    }

    /// Fingerprint of the certificate presented to peers
    pub fn fingerprint(&self) -> String {
        self.certificate.fingerprint()
    }

    /// Node configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Register an event handler
    pub fn on_event<F>(&mut self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.event_handlers.subscribe(handler)
    }

    /// Unsubscribe an event handler
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.event_handlers.unsubscribe(handle);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: SecureListener,
    context: Arc<ServeContext>,
    shutdown: CancellationToken,
) {
    let mut tasks = JoinSet::new();
    let mut backoff = AcceptBackoff::default();

    loop {
        let pending = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "connection task panicked");
                }
                continue;
            },
            accepted = listener.accept_pending() => match accepted {
                Ok(pending) => {
                    backoff.reset();
                    pending
                },
                Err(BootstrapError::Network(NetworkError::ListenerClosed)) => break,
                Err(e) => {
                    // Persistent failures such as fd exhaustion must not spin
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "accept failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {},
                    }
                    continue;
                },
            },
        };

        reap_finished(&mut tasks);

        let peer = pending.peer_addr();
        if tasks.len() >= context.max_connections {
            warn!(
                peer = %peer,
                limit = context.max_connections,
                "connection limit reached; dropping connection"
            );
            context.events.dispatch(Event::ConnectionFailed {
                peer,
                reason: "connection limit reached".to_string(),
            });
            continue;
        }

        let pending = pending.with_shutdown(shutdown.child_token());
        tasks.spawn(handle_connection(pending, Arc::clone(&context)));
    }

    listener.close();

    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "connection task panicked");
        }
    }
}

/// Delay before retrying a failed accept; doubles up to a cap
#[derive(Debug)]
struct AcceptBackoff {
    current: Duration,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            current: ACCEPT_BACKOFF_MIN,
        }
    }
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.current = ACCEPT_BACKOFF_MIN;
    }
}

/// Collect tasks that already finished so the limit only counts live ones
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(finished) = tasks.try_join_next() {
        if let Err(e) = finished {
            error!(error = %e, "connection task panicked");
        }
    }
}

async fn handle_connection(pending: PendingConnection, context: Arc<ServeContext>) {
    let peer = pending.peer_addr();

    if let Err(e) = serve_connection(pending, &context).await {
        if !e.is_connection_local() {
            error!(peer = %peer, error = %e, "connection failed");
        } else if e.is_timeout() {
            warn!(peer = %peer, error = %e, "connection timed out");
        } else {
            debug!(peer = %peer, error = %e, "connection failed");
        }
        context.events.dispatch(Event::ConnectionFailed {
            peer,
            reason: e.to_string(),
        });
    }
}

async fn serve_connection(pending: PendingConnection, context: &ServeContext) -> Result<()> {
    let mut connection = pending.handshake().await?;
    let peer = connection.peer_addr();

    context.events.dispatch(Event::PeerConnected {
        peer,
        fingerprint: connection.peer_fingerprint().map(str::to_string),
    });

    let mut handshake =
        BootnodeHandshake::from_encoded(Arc::clone(&context.advertisement), context.advertised);
    if let Err(e) = handshake.run(&mut connection).await {
        connection.close().await?;
        return Err(e);
    }
    context.events.dispatch(Event::AdvertisementSent {
        peer,
        endpoints: context.advertised,
    });

    let Some(responder) = &context.responder else {
        return connection.close().await;
    };

    match PeerSession::new(connection).respond(responder.as_ref()).await {
        Ok(exchange) => {
            context.events.dispatch(Event::SessionCompleted {
                peer,
                request_len: exchange.request_len,
                response_len: exchange.response_len,
            });
            Ok(())
        },
        // A peer that only wanted the advertisement hangs up here
        Err(BootstrapError::Network(NetworkError::ConnectionClosed)) => {
            debug!(peer = %peer, "peer left after advertisement");
            Ok(())
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> CertificateMaterial {
        CertificateMaterial::self_signed(&["localhost", "127.0.0.1"]).unwrap()
    }

    #[test]
    fn test_build_requires_certificate() {
        let result = NodeBuilder::new().build();
        assert!(matches!(
            result,
            Err(BootstrapError::Config(ConfigError::MissingRequiredField { .. }))
        ));
    }

    #[test]
    fn test_build_validates_limits() {
        let result = NodeBuilder::new()
            .with_certificate(material())
            .with_max_connections(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_settings() {
        let node = NodeBuilder::new()
            .with_certificate(material())
            .with_bind_address("127.0.0.1:0".parse().unwrap())
            .advertise_endpoints(vec![])
            .with_max_connections(4)
            .build()
            .unwrap();

        assert_eq!(node.state(), NodeState::Created);
        assert_eq!(node.config().advertise, AdvertisePolicy::Endpoints(vec![]));
        assert_eq!(node.config().max_connections, 4);
        assert!(node.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_node_lifecycle() {
        let mut node = NodeBuilder::new()
            .with_certificate(material())
            .build()
            .unwrap();

        assert_eq!(node.state(), NodeState::Created);

        node.start().await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        let addr = node.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(
            node.advertised_endpoints().unwrap(),
            &[Endpoint::from_socket_addr(addr)]
        );

        // Starting twice is rejected
        assert!(node.start().await.is_err());

        node.stop().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(node.local_addr().is_none());

        // Stopping twice is rejected
        assert!(node.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_start_reports_bind_failure() {
        let mut first = NodeBuilder::new()
            .with_certificate(material())
            .build()
            .unwrap();
        first.start().await.unwrap();

        let mut second = NodeBuilder::new()
            .with_certificate(material())
            .with_bind_address(first.local_addr().unwrap())
            .build()
            .unwrap();

        let result = second.start().await;
        assert!(matches!(
            result,
            Err(BootstrapError::Network(NetworkError::BindFailed { .. }))
        ));
        assert_eq!(second.state(), NodeState::Created);

        first.stop().await.unwrap();
    }

    #[test]
    fn test_accept_backoff_grows_and_resets() {
        let mut backoff = AcceptBackoff::default();

        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MIN);
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MIN * 2);

        for _ in 0..20 {
            assert!(backoff.next_delay() <= ACCEPT_BACKOFF_MAX);
        }
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MIN);
    }

    #[tokio::test]
    async fn test_reap_finished_drops_completed_tasks() {
        let mut tasks = JoinSet::new();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        tasks.spawn(async {});
        tasks.spawn(async move {
            let _ = wait.await;
        });

        // Let the first task run to completion
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tasks.len(), 2);

        reap_finished(&mut tasks);
        assert_eq!(tasks.len(), 1);

        release.send(()).unwrap();
        tasks.join_next().await.unwrap().unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let mut node = NodeBuilder::new()
            .with_certificate(material())
            .build()
            .unwrap();

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        node.on_event(move |event| events_clone.lock().push(event));

        node.start().await.unwrap();
        node.stop().await.unwrap();

        let events = events.lock();
        assert!(matches!(events[0], Event::Listening { .. }));
        assert_eq!(events.last(), Some(&Event::NodeStopped));
    }
}
