//! 单元测试共用的适配器桩

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CaipNetwork, ChainNamespace, DEFAULT_NETWORKS};
use crate::error::AdapterError;
use crate::service::adapter::*;
use crate::service::chain_controller::ChainController;

pub struct StubAdapter {
    namespace: ChainNamespace,
    pub fail_switch: AtomicBool,
}

impl StubAdapter {
    pub fn new(namespace: ChainNamespace) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            fail_switch: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ChainAdapter for StubAdapter {
    fn namespace(&self) -> ChainNamespace {
        self.namespace
    }

    async fn connect(&self, _params: ConnectParams) -> AdapterResult<ConnectResult> {
        Err(AdapterError::Unsupported("stub".into()))
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn get_accounts(&self) -> AdapterResult<Vec<AccountAddress>> {
        Ok(vec![])
    }

    async fn sync_connection(&self, _params: SyncConnectionParams) -> AdapterResult<ConnectionResult> {
        Err(AdapterError::Unsupported("stub".into()))
    }

    async fn switch_network(&self, _network: &CaipNetwork) -> AdapterResult<()> {
        if self.fail_switch.load(Ordering::SeqCst) {
            Err(AdapterError::UserRejected("switch".into()))
        } else {
            Ok(())
        }
    }

    async fn sign_message(&self, _message: &str, _address: &str) -> AdapterResult<String> {
        Err(AdapterError::Unsupported("stub".into()))
    }
}

/// 按顺序注册命名空间，网络取内置预设
pub fn controller_with(namespaces: &[ChainNamespace]) -> ChainController {
    let mut controller = ChainController::default();
    for ns in namespaces {
        let networks = DEFAULT_NETWORKS
            .iter()
            .filter(|n| n.chain_namespace == *ns)
            .cloned()
            .collect();
        controller
            .register_namespace(*ns, StubAdapter::new(*ns), networks)
            .unwrap();
    }
    controller
}
