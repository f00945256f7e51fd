//! SIWX 认证关卡
//!
//! 驱动状态机完成 requestingAuthentication → validatingAuthentication → connected，
//! 每条失败路径都会向状态机发送对应事件，不会停留在中间状态。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{CaipNetwork, ChainNamespace};
use crate::error::{AdapterError, AppKitError, Result};
use crate::service::adapter::ChainAdapter;
use crate::service::connection_state_machine::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine,
};
use crate::service::siwx::{AuthenticationPolicy, SiwxMessage, SiwxMessageInput, SiwxSession};

#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    pub address: String,
    pub network: CaipNetwork,
    /// 社交登录弹窗需要超时，其它连接器可以不设
    pub timeout: Option<Duration>,
}

enum Step<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn with_deadline<F: Future>(fut: F, deadline: Option<Instant>) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

type InFlight = Arc<Mutex<HashMap<ChainNamespace, Arc<Notify>>>>;

fn lock_inflight(inflight: &InFlight) -> MutexGuard<'_, HashMap<ChainNamespace, Arc<Notify>>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 流程结束（包括提前返回）时移除该命名空间的挂起请求
struct PendingGuard {
    inflight: InFlight,
    namespace: ChainNamespace,
    cancel: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut inflight = lock_inflight(&self.inflight);
        if inflight
            .get(&self.namespace)
            .is_some_and(|current| Arc::ptr_eq(current, &self.cancel))
        {
            inflight.remove(&self.namespace);
        }
    }
}

/// 每个命名空间最多一个进行中的认证请求，各自可单独取消
#[derive(Debug, Clone, Default)]
pub struct SiwxGate {
    inflight: InFlight,
}

impl SiwxGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, namespace: ChainNamespace) -> bool {
        lock_inflight(&self.inflight).contains_key(&namespace)
    }

    pub fn pending_namespaces(&self) -> Vec<ChainNamespace> {
        lock_inflight(&self.inflight).keys().copied().collect()
    }

    /// 任一命名空间的认证请求未完成时禁止关闭弹窗
    pub fn is_siwx_close_disabled(&self) -> bool {
        !lock_inflight(&self.inflight).is_empty()
    }

    /// 中止该命名空间正在进行的认证（按拒绝处理），没有挂起请求时返回 false
    pub fn cancel(&self, namespace: ChainNamespace) -> bool {
        let cancel = lock_inflight(&self.inflight).get(&namespace).cloned();
        match cancel {
            Some(cancel) => {
                tracing::info!(namespace = %namespace, "Cancelling pending SIWX authentication");
                cancel.notify_waiters();
                true
            }
            None => false,
        }
    }

    pub async fn create_message(
        &self,
        policy: &AuthenticationPolicy,
        address: &str,
        network: &CaipNetwork,
    ) -> Result<SiwxMessage> {
        let client = policy.client().ok_or(AppKitError::SiwxDisabled)?;
        client
            .create_message(SiwxMessageInput {
                account_address: address.to_string(),
                chain_id: network.caip_network_id.clone(),
                network_name: network.name.clone(),
            })
            .await
    }

    pub async fn verify_message(
        &self,
        policy: &AuthenticationPolicy,
        session: &SiwxSession,
    ) -> Result<bool> {
        let client = policy.client().ok_or(AppKitError::SiwxDisabled)?;
        client.verify_message(session).await
    }

    /// 执行认证流程
    ///
    /// 状态机必须处于 requestingAuthentication。已有有效会话时直接复用，不再请求签名。
    pub async fn authenticate(
        &self,
        machine: &mut ConnectionStateMachine,
        adapter: &dyn ChainAdapter,
        request: AuthenticationRequest,
    ) -> Result<SiwxSession> {
        let namespace = machine.namespace();
        if machine.state() != ConnectionState::RequestingAuthentication {
            return Err(AppKitError::InvalidState {
                namespace,
                expected: ConnectionState::RequestingAuthentication,
                actual: machine.state(),
            });
        }

        let Some(client) = machine.policy().client() else {
            machine.send(ConnectionEvent::AuthenticationRejected {
                reason: "SIWX is not enabled".to_string(),
            });
            return Err(AppKitError::SiwxDisabled);
        };

        let cancel = Arc::new(Notify::new());
        let cancelled = cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        lock_inflight(&self.inflight).insert(namespace, cancel.clone());
        let _guard = PendingGuard {
            inflight: self.inflight.clone(),
            namespace,
            cancel: cancel.clone(),
        };

        let timeout = request.timeout.unwrap_or_default();
        let deadline = request.timeout.map(|t| Instant::now() + t);
        let chain_id = request.network.caip_network_id.clone();

        // 复用已有会话
        match client.get_session(&chain_id, &request.address).await {
            Ok(Some(session)) => {
                tracing::info!(namespace = %namespace, "Reusing existing SIWX session");
                machine.send(ConnectionEvent::AuthenticationApproved);
                machine.send(ConnectionEvent::AuthenticationSuccess {
                    session: session.clone(),
                });
                return Ok(session);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(namespace = %namespace, error = %e, "Failed to read SIWX sessions"),
        }

        let message = match client
            .create_message(SiwxMessageInput {
                account_address: request.address.clone(),
                chain_id,
                network_name: request.network.name.clone(),
            })
            .await
        {
            Ok(message) => message,
            Err(e) => {
                machine.send(ConnectionEvent::AuthenticationRejected {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        let text = message.to_string();

        // 等待钱包签名
        let step = tokio::select! {
            biased;
            _ = cancelled.as_mut() => Step::Cancelled,
            signed = with_deadline(adapter.sign_message(&text, &request.address), deadline) => {
                match signed {
                    Some(result) => Step::Done(result),
                    None => Step::TimedOut,
                }
            }
        };

        let signature = match step {
            Step::Done(Ok(signature)) => signature,
            Step::Done(Err(e)) => {
                tracing::info!(namespace = %namespace, error = %e, "SIWX signature rejected");
                machine.send(ConnectionEvent::AuthenticationRejected {
                    reason: e.to_string(),
                });
                return Err(AppKitError::adapter(namespace, e));
            }
            Step::TimedOut => {
                tracing::warn!(namespace = %namespace, ?timeout, "SIWX signature timed out");
                machine.send(ConnectionEvent::AuthenticationRejected {
                    reason: "signature request timed out".to_string(),
                });
                return Err(AppKitError::Timeout(timeout));
            }
            Step::Cancelled => {
                machine.send(ConnectionEvent::AuthenticationRejected {
                    reason: "authentication cancelled".to_string(),
                });
                return Err(AppKitError::adapter(
                    namespace,
                    AdapterError::UserRejected("authentication cancelled".to_string()),
                ));
            }
        };

        machine.send(ConnectionEvent::AuthenticationApproved);

        let session = SiwxSession {
            data: message.data,
            message: text,
            signature,
        };

        // 验证并保存
        let step = tokio::select! {
            biased;
            _ = cancelled.as_mut() => Step::Cancelled,
            verified = with_deadline(client.add_session(session.clone()), deadline) => {
                match verified {
                    Some(result) => Step::Done(result),
                    None => Step::TimedOut,
                }
            }
        };

        match step {
            Step::Done(Ok(())) => {
                tracing::info!(namespace = %namespace, address = %session.address(), "SIWX authentication succeeded");
                machine.send(ConnectionEvent::AuthenticationSuccess {
                    session: session.clone(),
                });
                Ok(session)
            }
            Step::Done(Err(e)) => {
                tracing::warn!(namespace = %namespace, error = %e, "SIWX verification failed");
                machine.send(ConnectionEvent::AuthenticationFailure {
                    reason: e.to_string(),
                });
                Err(e)
            }
            Step::TimedOut => {
                machine.send(ConnectionEvent::AuthenticationFailure {
                    reason: "verification timed out".to_string(),
                });
                Err(AppKitError::Timeout(timeout))
            }
            Step::Cancelled => {
                machine.send(ConnectionEvent::AuthenticationFailure {
                    reason: "authentication cancelled".to_string(),
                });
                Err(AppKitError::Siwx("authentication cancelled".to_string()))
            }
        }
    }
}
