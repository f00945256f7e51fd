//! 连接器注册表
//!
//! 保存可用的连接器，以及每个命名空间当前激活的连接器 id
//! （每个命名空间最多一个）。

use std::collections::HashMap;

use crate::domain::{ChainNamespace, Connector, ConnectorKind, SessionScope, AUTH_CONNECTOR_ID};

#[derive(Debug, Default, Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Connector>,
    active: HashMap<ChainNamespace, String>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 id 去重，后添加的覆盖先添加的
    pub fn add_connector(&mut self, connector: Connector) {
        if let Some(existing) = self.connectors.iter_mut().find(|c| c.id == connector.id) {
            tracing::debug!(connector_id = %connector.id, "Replacing connector");
            *existing = connector;
        } else {
            tracing::debug!(connector_id = %connector.id, kind = connector.kind.as_str(), "Adding connector");
            self.connectors.push(connector);
        }
    }

    pub fn remove_connector(&mut self, connector_id: &str) -> Option<Connector> {
        let index = self.connectors.iter().position(|c| c.id == connector_id)?;
        Some(self.connectors.remove(index))
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn get_connector(&self, connector_id: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == connector_id)
    }

    pub fn connectors_for(&self, namespace: ChainNamespace) -> Vec<&Connector> {
        self.connectors
            .iter()
            .filter(|c| c.supports(namespace))
            .collect()
    }

    pub fn connectors_of_kind(&self, kind: ConnectorKind) -> Vec<&Connector> {
        self.connectors.iter().filter(|c| c.kind == kind).collect()
    }

    pub fn get_auth_connector(&self) -> Option<&Connector> {
        self.connectors
            .iter()
            .find(|c| c.kind == ConnectorKind::Auth || c.id == AUTH_CONNECTOR_ID)
    }

    /// Auth 连接器能否在该命名空间上建立会话；未注册 Auth 连接器时按内置支持列表判断
    pub fn auth_supports(&self, namespace: ChainNamespace) -> bool {
        match self.get_auth_connector() {
            Some(connector) => connector.supports(namespace),
            None => namespace.is_auth_supported(),
        }
    }

    pub fn get_connector_id(&self, namespace: ChainNamespace) -> Option<&str> {
        self.active.get(&namespace).map(String::as_str)
    }

    /// 覆盖该命名空间之前的激活连接器
    pub fn set_connector_id(&mut self, namespace: ChainNamespace, connector_id: &str) {
        tracing::debug!(namespace = %namespace, connector_id, "Active connector set");
        self.active.insert(namespace, connector_id.to_string());
    }

    pub fn remove_connector_id(&mut self, namespace: ChainNamespace) -> Option<String> {
        self.active.remove(&namespace)
    }

    pub fn active_connector(&self, namespace: ChainNamespace) -> Option<&Connector> {
        self.get_connector_id(namespace)
            .and_then(|id| self.get_connector(id))
    }

    /// 该命名空间当前连接所属的会话作用域
    ///
    /// 未知连接器按约定的 id 推断。
    pub fn session_scope(&self, namespace: ChainNamespace) -> Option<SessionScope> {
        let connector_id = self.get_connector_id(namespace)?;
        Some(
            self.get_connector(connector_id)
                .map(Connector::session_scope)
                .unwrap_or_else(|| SessionScope::from_connector_id(connector_id)),
        )
    }

    pub fn is_auth_connected(&self, namespace: ChainNamespace) -> bool {
        matches!(
            self.session_scope(namespace),
            Some(SessionScope::Shared(crate::domain::SessionGroup::Auth))
        )
    }
}
