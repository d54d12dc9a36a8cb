//! Node connector with channel caching.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use nebula_meta::NodeId;

use crate::client::{NodeClient, RemoteNodeClient};
use crate::error::{ClientError, ClientResult};

/// Client transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for a connection.
    pub connect_timeout: Duration,
    /// Per-RPC deadline; the reconciler sets this to a fraction of its
    /// tick interval so a slow node cannot stall a tick.
    pub rpc_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(4),
        }
    }
}

/// Makes node clients on demand.
///
/// The trait is the seam between the control plane and the transport;
/// tests plug in [`crate::mock::MockConnector`].
pub trait NodeConnector: Send + Sync {
    /// Returns a client for `node`, connecting if necessary.
    ///
    /// A failure here means no RPC was established on the node.
    fn make_client(
        &self,
        node: &NodeId,
    ) -> Pin<Box<dyn Future<Output = ClientResult<Arc<dyn NodeClient>>> + Send + '_>>;

    /// Drops any cached connection state for `node`.
    fn evict(&self, node: &NodeId);
}

/// Tonic-backed connector caching one channel per node.
///
/// Channels multiplex, so the coordinator keeps exactly one per node and
/// clones it into every client.
pub struct RemoteNodeConnector {
    config: ClientConfig,
    channels: Mutex<HashMap<NodeId, Channel>>,
}

impl RemoteNodeConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    async fn channel(&self, node: &NodeId) -> ClientResult<Channel> {
        if let Some(channel) = self.channels.lock().get(node) {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{node}"))
            .map_err(|e| ClientError::Connect {
                node: node.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.rpc_timeout);

        debug!(node = %node, "connecting");
        let channel = endpoint.connect().await.map_err(|e| ClientError::Connect {
            node: node.clone(),
            reason: e.to_string(),
        })?;

        self.channels.lock().insert(node.clone(), channel.clone());
        Ok(channel)
    }
}

impl NodeConnector for RemoteNodeConnector {
    fn make_client(
        &self,
        node: &NodeId,
    ) -> Pin<Box<dyn Future<Output = ClientResult<Arc<dyn NodeClient>>> + Send + '_>> {
        let node = node.clone();
        Box::pin(async move {
            let channel = self.channel(&node).await?;
            Ok(Arc::new(RemoteNodeClient::new(node, channel)) as Arc<dyn NodeClient>)
        })
    }

    fn evict(&self, node: &NodeId) {
        self.channels.lock().remove(node);
    }
}
