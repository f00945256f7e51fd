//! 连接状态机模块
//!
//! 每个命名空间一个实例，管理一次逻辑连接的生命周期：
//!
//! ```text
//! disconnected --CONNECT_REQUEST--> connecting
//! connecting --CONNECT_SUCCESS--> requestingAuthentication   (SIWX 启用)
//! connecting --CONNECT_SUCCESS--> connected                  (SIWX 未启用)
//! connecting --CONNECT_FAILURE--> disconnected
//! requestingAuthentication --AUTHENTICATION_APPROVED--> validatingAuthentication
//! requestingAuthentication --AUTHENTICATION_REJECTED--> disconnected
//! validatingAuthentication --AUTHENTICATION_SUCCESS--> connected
//! validatingAuthentication --AUTHENTICATION_FAILURE--> disconnected
//! connected --DISCONNECT--> disconnected
//! ```
//!
//! 当前状态不接受的事件直接忽略（重复或迟到的钱包事件）。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{CaipNetwork, CaipNetworkId, ChainNamespace};
use crate::service::siwx::{AuthenticationPolicy, SiwxSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    RequestingAuthentication,
    ValidatingAuthentication,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::RequestingAuthentication => "requestingAuthentication",
            ConnectionState::ValidatingAuthentication => "validatingAuthentication",
            ConnectionState::Connected => "connected",
        }
    }

    /// 是否处于等待外部响应的中间状态
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::RequestingAuthentication
                | ConnectionState::ValidatingAuthentication
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条已建立的连接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connector_id: String,
    pub address: String,
    pub chain_id: CaipNetworkId,
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequest,
    ConnectSuccess { connection: ConnectionRecord },
    ConnectFailure { reason: String },
    AuthenticationApproved,
    AuthenticationRejected { reason: String },
    AuthenticationSuccess { session: SiwxSession },
    AuthenticationFailure { reason: String },
    Disconnect,
}

impl ConnectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::ConnectRequest => "CONNECT_REQUEST",
            ConnectionEvent::ConnectSuccess { .. } => "CONNECT_SUCCESS",
            ConnectionEvent::ConnectFailure { .. } => "CONNECT_FAILURE",
            ConnectionEvent::AuthenticationApproved => "AUTHENTICATION_APPROVED",
            ConnectionEvent::AuthenticationRejected { .. } => "AUTHENTICATION_REJECTED",
            ConnectionEvent::AuthenticationSuccess { .. } => "AUTHENTICATION_SUCCESS",
            ConnectionEvent::AuthenticationFailure { .. } => "AUTHENTICATION_FAILURE",
            ConnectionEvent::Disconnect => "DISCONNECT",
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            ConnectionEvent::ConnectFailure { reason }
            | ConnectionEvent::AuthenticationRejected { reason }
            | ConnectionEvent::AuthenticationFailure { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// 状态机上下文
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub connections: HashMap<ChainNamespace, Vec<ConnectionRecord>>,
    pub active_caip_network_id: Option<CaipNetworkId>,
    pub networks: Vec<CaipNetwork>,
    /// 等待认证完成的连接
    pub pending: Option<ConnectionRecord>,
    pub session: Option<SiwxSession>,
}

/// 状态转换记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub event: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
}

pub struct ConnectionStateMachine {
    namespace: ChainNamespace,
    state: ConnectionState,
    context: ConnectionContext,
    policy: AuthenticationPolicy,
    history: Vec<StateTransition>,
}

impl ConnectionStateMachine {
    pub fn new(
        namespace: ChainNamespace,
        networks: Vec<CaipNetwork>,
        policy: AuthenticationPolicy,
    ) -> Self {
        Self {
            namespace,
            state: ConnectionState::Disconnected,
            context: ConnectionContext {
                networks,
                ..Default::default()
            },
            policy,
            history: Vec::new(),
        }
    }

    pub fn namespace(&self) -> ChainNamespace {
        self.namespace
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn policy(&self) -> &AuthenticationPolicy {
        &self.policy
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// 当前连接（已连接时）或等待认证的连接
    pub fn current_connection(&self) -> Option<&ConnectionRecord> {
        self.context.pending.as_ref().or_else(|| {
            self.context
                .connections
                .get(&self.namespace)
                .and_then(|records| records.last())
        })
    }

    /// 处理事件；不适用于当前状态的事件被忽略并返回 `None`
    pub fn send(&mut self, event: ConnectionEvent) -> Option<StateTransition> {
        let from = self.state;
        let event_name = event.as_str();
        let reason = event.reason();

        let to = match (from, event) {
            (ConnectionState::Disconnected, ConnectionEvent::ConnectRequest) => {
                ConnectionState::Connecting
            }
            (ConnectionState::Connecting, ConnectionEvent::ConnectSuccess { connection }) => {
                // 守卫在转换发生时读取
                if self.policy.is_enabled() {
                    self.context.pending = Some(connection);
                    ConnectionState::RequestingAuthentication
                } else {
                    self.commit(connection);
                    ConnectionState::Connected
                }
            }
            (ConnectionState::Connecting, ConnectionEvent::ConnectFailure { .. }) => {
                self.discard();
                ConnectionState::Disconnected
            }
            (
                ConnectionState::RequestingAuthentication,
                ConnectionEvent::AuthenticationApproved,
            ) => ConnectionState::ValidatingAuthentication,
            (
                ConnectionState::RequestingAuthentication,
                ConnectionEvent::AuthenticationRejected { .. },
            ) => {
                self.discard();
                ConnectionState::Disconnected
            }
            (
                ConnectionState::ValidatingAuthentication,
                ConnectionEvent::AuthenticationSuccess { session },
            ) => {
                if let Some(connection) = self.context.pending.take() {
                    self.commit(connection);
                }
                self.context.session = Some(session);
                ConnectionState::Connected
            }
            (
                ConnectionState::ValidatingAuthentication,
                ConnectionEvent::AuthenticationFailure { .. },
            ) => {
                self.discard();
                ConnectionState::Disconnected
            }
            (ConnectionState::Connected, ConnectionEvent::Disconnect) => {
                self.reset();
                ConnectionState::Disconnected
            }
            (state, _) => {
                tracing::debug!(
                    namespace = %self.namespace,
                    state = %state,
                    event = event_name,
                    "Ignoring event not valid for current state"
                );
                return None;
            }
        };

        self.state = to;
        let transition = StateTransition {
            from,
            to,
            event: event_name.to_string(),
            timestamp: chrono::Utc::now(),
            reason,
        };

        tracing::info!(
            namespace = %self.namespace,
            from = %from,
            to = %to,
            event = event_name,
            "Connection state transition"
        );

        self.history.push(transition.clone());
        Some(transition)
    }

    fn commit(&mut self, connection: ConnectionRecord) {
        self.context.active_caip_network_id = Some(connection.chain_id.clone());
        self.context
            .connections
            .entry(self.namespace)
            .or_default()
            .push(connection);
    }

    /// 失败路径：丢弃该命名空间的全部部分连接数据
    fn discard(&mut self) {
        self.context.pending = None;
        self.context.session = None;
        self.context.connections.remove(&self.namespace);
        self.context.active_caip_network_id = None;
    }

    /// 完全断开：清空上下文，保留配置的网络列表
    fn reset(&mut self) {
        self.context.connections.clear();
        self.context.pending = None;
        self.context.session = None;
        self.context.active_caip_network_id = None;
    }
}
