pub mod agent;
pub mod node;
pub mod report;

pub use agent::{exam, load_test, misconduct};
pub use node::node;
pub use report::{backup, marksheet, stats, sync};

use anyhow::Result;

use proctor::config::{Config, Role};
use proctor::rpc::{ClientConfig, NodeClient};

/// Client for the node configured under `role`
pub(crate) fn client_for(config: &Config, role: Role) -> Result<NodeClient> {
    let peer = config.cluster.peer(role);
    let client_config = ClientConfig::new(&peer.url).with_timeout(config.rpc.timeout());
    Ok(NodeClient::new(peer.node_id(), client_config)?)
}
