// Provider 事件总线
// 适配器通过一个类型化的通道上报钱包事件；状态变更通过广播通知订阅者

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::domain::{CaipNetworkId, ChainNamespace};
use crate::service::connection_state_machine::ConnectionState;

// ============ Provider 事件 ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProviderEvent {
    Connect {
        address: String,
        chain_id: CaipNetworkId,
    },
    AccountsChanged {
        accounts: Vec<String>,
    },
    ChainChanged {
        chain_id: CaipNetworkId,
    },
    Disconnect,
}

impl ProviderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProviderEvent::Connect { .. } => "connect",
            ProviderEvent::AccountsChanged { .. } => "accountsChanged",
            ProviderEvent::ChainChanged { .. } => "chainChanged",
            ProviderEvent::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEventEnvelope {
    pub event_id: Uuid,
    pub namespace: ChainNamespace,
    pub event: ProviderEvent,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl ProviderEventEnvelope {
    pub fn new(namespace: ChainNamespace, event: ProviderEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            namespace,
            event,
            received_at: chrono::Utc::now(),
        }
    }
}

/// 交给适配器的发送端，绑定到一个命名空间
#[derive(Debug, Clone)]
pub struct ProviderEventSender {
    namespace: ChainNamespace,
    sender: mpsc::UnboundedSender<ProviderEventEnvelope>,
}

impl ProviderEventSender {
    pub fn namespace(&self) -> ChainNamespace {
        self.namespace
    }

    /// 上报事件，返回事件 id
    ///
    /// 总线已关闭时事件被丢弃并记录警告。
    pub fn emit(&self, event: ProviderEvent) -> Uuid {
        let envelope = ProviderEventEnvelope::new(self.namespace, event);
        let event_id = envelope.event_id;

        if let Err(e) = self.sender.send(envelope) {
            tracing::warn!(
                namespace = %self.namespace,
                event = e.0.event.event_type(),
                "Provider event bus closed, event dropped"
            );
        }

        event_id
    }
}

pub struct ProviderEventBus {
    sender: mpsc::UnboundedSender<ProviderEventEnvelope>,
    receiver: mpsc::UnboundedReceiver<ProviderEventEnvelope>,
}

impl Default for ProviderEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderEventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub fn sender(&self, namespace: ChainNamespace) -> ProviderEventSender {
        ProviderEventSender {
            namespace,
            sender: self.sender.clone(),
        }
    }

    /// 取出当前已排队的全部事件（按到达顺序）
    pub fn drain(&mut self) -> Vec<ProviderEventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            events.push(envelope);
        }
        events
    }
}

// ============ 状态变更通知 ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    NamespaceRegistered(ChainNamespace),
    NamespaceRemoved(ChainNamespace),
    ActiveNamespaceChanged(Option<ChainNamespace>),
    ActiveNetworkChanged {
        namespace: ChainNamespace,
        network: CaipNetworkId,
    },
    AccountChanged {
        namespace: ChainNamespace,
        address: Option<String>,
    },
    ConnectionStateChanged {
        namespace: ChainNamespace,
        from: ConnectionState,
        to: ConnectionState,
    },
    ConnectorChanged {
        namespace: ChainNamespace,
        connector_id: Option<String>,
    },
}

/// 状态变更广播
#[derive(Debug, Clone)]
pub struct StateNotifier {
    sender: broadcast::Sender<StateChange>,
}

impl StateNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }

    /// 没有订阅者时静默丢弃
    pub fn notify(&self, change: StateChange) {
        tracing::trace!(?change, "State change");
        let _ = self.sender.send(change);
    }
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
