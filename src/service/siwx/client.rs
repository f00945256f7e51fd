//! 可插拔的 SIWX 客户端
//!
//! `SiwxClient` 负责 nonce、消息构造、签名验证与会话管理；
//! `DefaultSiwx` 是本地实现，会话保存在持久化存储中。

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::CaipNetworkId;
use crate::error::{AppKitError, Result};
use crate::infrastructure::PersistedState;
use crate::service::siwx::{
    Eip155Verifier, InformalMessenger, SiwxMessage, SiwxMessageInput, SiwxSession, SiwxVerifier,
    SolanaVerifier,
};

#[async_trait]
pub trait SiwxClient: Send + Sync {
    async fn get_nonce(&self) -> Result<String>;

    async fn create_message(&self, input: SiwxMessageInput) -> Result<SiwxMessage>;

    async fn verify_message(&self, session: &SiwxSession) -> Result<bool>;

    /// 验证并保存会话；签名无效时返回 `SignatureVerification`
    async fn add_session(&self, session: SiwxSession) -> Result<()>;

    /// 账户在该网络上仍然有效的会话
    async fn get_sessions(&self, chain_id: &CaipNetworkId, address: &str)
        -> Result<Vec<SiwxSession>>;

    async fn get_session(
        &self,
        chain_id: &CaipNetworkId,
        address: &str,
    ) -> Result<Option<SiwxSession>> {
        Ok(self.get_sessions(chain_id, address).await?.into_iter().next())
    }

    async fn set_sessions(&self, sessions: Vec<SiwxSession>) -> Result<()>;

    async fn revoke_session(&self, chain_id: &CaipNetworkId, address: &str) -> Result<()>;

    async fn sign_out(&self) -> Result<()>;

    /// 是否强制要求签名（为 true 时不允许关闭签名弹窗）
    fn required(&self) -> bool {
        false
    }

    fn sign_out_on_disconnect(&self) -> bool {
        true
    }
}

/// 认证策略
///
/// 在构造状态机时传入；SIWX 客户端可在运行期替换，
/// 状态机在 CONNECT_SUCCESS 发生时读取当前值。
#[derive(Clone, Default)]
pub struct AuthenticationPolicy {
    client: Arc<RwLock<Option<Arc<dyn SiwxClient>>>>,
}

impl AuthenticationPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_client(client: Arc<dyn SiwxClient>) -> Self {
        Self {
            client: Arc::new(RwLock::new(Some(client))),
        }
    }

    pub fn set_client(&self, client: Option<Arc<dyn SiwxClient>>) {
        match self.client.write() {
            Ok(mut guard) => *guard = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
    }

    pub fn client(&self) -> Option<Arc<dyn SiwxClient>> {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client().is_some()
    }
}

impl std::fmt::Debug for AuthenticationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationPolicy")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

pub struct DefaultSiwx {
    messenger: InformalMessenger,
    verifiers: Vec<Arc<dyn SiwxVerifier>>,
    storage: PersistedState,
    required: bool,
    sign_out_on_disconnect: bool,
}

impl DefaultSiwx {
    /// 默认启用 EVM 与 Solana 验证器
    pub fn new(messenger: InformalMessenger, storage: PersistedState) -> Self {
        Self {
            messenger,
            verifiers: vec![Arc::new(Eip155Verifier), Arc::new(SolanaVerifier)],
            storage,
            required: false,
            sign_out_on_disconnect: true,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SiwxVerifier>) -> Self {
        self.verifiers
            .retain(|existing| existing.namespace() != verifier.namespace());
        self.verifiers.push(verifier);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_sign_out_on_disconnect(mut self, enabled: bool) -> Self {
        self.sign_out_on_disconnect = enabled;
        self
    }

    fn verifier_for(&self, session: &SiwxSession) -> Result<&Arc<dyn SiwxVerifier>> {
        let namespace = session.chain_id().namespace();
        self.verifiers
            .iter()
            .find(|v| v.namespace() == namespace)
            .ok_or_else(|| AppKitError::Siwx(format!("no verifier for namespace {}", namespace)))
    }

    /// 读取会话并丢弃已过期的
    fn active_sessions(&self) -> Result<Vec<SiwxSession>> {
        let now = Utc::now();
        let sessions = self.storage.siwx_sessions()?;
        let total = sessions.len();
        let active: Vec<SiwxSession> = sessions
            .into_iter()
            .filter(|s| !s.data.is_expired(now))
            .collect();

        if active.len() != total {
            tracing::debug!(expired = total - active.len(), "Dropping expired SIWX sessions");
            self.storage.set_siwx_sessions(&active)?;
        }

        Ok(active)
    }

    async fn ensure_valid(&self, session: &SiwxSession) -> Result<()> {
        if session.data.is_expired(Utc::now()) {
            return Err(AppKitError::Siwx("session has expired".to_string()));
        }
        if !self.verify_message(session).await? {
            return Err(AppKitError::SignatureVerification);
        }
        Ok(())
    }
}

#[async_trait]
impl SiwxClient for DefaultSiwx {
    async fn get_nonce(&self) -> Result<String> {
        Ok(self.messenger.generate_nonce())
    }

    async fn create_message(&self, input: SiwxMessageInput) -> Result<SiwxMessage> {
        let nonce = self.get_nonce().await?;
        Ok(self.messenger.create_message(input, nonce))
    }

    async fn verify_message(&self, session: &SiwxSession) -> Result<bool> {
        self.verifier_for(session)?.verify(session)
    }

    async fn add_session(&self, session: SiwxSession) -> Result<()> {
        self.ensure_valid(&session).await?;

        let mut sessions = self.active_sessions()?;
        sessions.retain(|s| !s.belongs_to(session.chain_id(), session.address()));
        tracing::info!(
            chain_id = %session.chain_id(),
            address = %session.address(),
            "SIWX session added"
        );
        sessions.push(session);
        self.storage.set_siwx_sessions(&sessions)
    }

    async fn get_sessions(
        &self,
        chain_id: &CaipNetworkId,
        address: &str,
    ) -> Result<Vec<SiwxSession>> {
        let now = Utc::now();
        Ok(self
            .active_sessions()?
            .into_iter()
            .filter(|s| s.belongs_to(chain_id, address) && s.data.is_active(now))
            .collect())
    }

    async fn set_sessions(&self, sessions: Vec<SiwxSession>) -> Result<()> {
        for session in &sessions {
            self.ensure_valid(session).await?;
        }
        self.storage.set_siwx_sessions(&sessions)
    }

    async fn revoke_session(&self, chain_id: &CaipNetworkId, address: &str) -> Result<()> {
        let mut sessions = self.active_sessions()?;
        sessions.retain(|s| !s.belongs_to(chain_id, address));
        self.storage.set_siwx_sessions(&sessions)
    }

    async fn sign_out(&self) -> Result<()> {
        tracing::info!("SIWX sign out");
        self.storage.set_siwx_sessions(&[])
    }

    fn required(&self) -> bool {
        self.required
    }

    fn sign_out_on_disconnect(&self) -> bool {
        self.sign_out_on_disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::siwx::verifier::test_keys::*;
    use std::time::Duration;

    fn siwx(storage: PersistedState) -> DefaultSiwx {
        DefaultSiwx::new(
            InformalMessenger::new("example.com", "https://example.com")
                .with_expiration(Duration::from_secs(3600)),
            storage,
        )
    }

    async fn signed_session(client: &DefaultSiwx, seed: u8) -> SiwxSession {
        let key = evm_key(seed);
        let message = client
            .create_message(SiwxMessageInput {
                account_address: evm_address(&key),
                chain_id: "eip155:1".parse().unwrap(),
                network_name: "Ethereum".to_string(),
            })
            .await
            .unwrap();
        let text = message.to_string();
        SiwxSession {
            signature: evm_sign(&key, &text),
            message: text,
            data: message.data,
        }
    }

    #[tokio::test]
    async fn test_add_and_get_session() {
        let client = siwx(PersistedState::in_memory());
        let session = signed_session(&client, 1).await;
        let chain_id = session.chain_id().clone();
        let address = session.address().to_uppercase();

        client.add_session(session.clone()).await.unwrap();

        let found = client.get_session(&chain_id, &address).await.unwrap();
        assert_eq!(found, Some(session));
    }

    #[tokio::test]
    async fn test_reject_forged_session() {
        let storage = PersistedState::in_memory();
        let client = siwx(storage.clone());
        let mut session = signed_session(&client, 1).await;
        session.data.account_address = evm_address(&evm_key(2));

        let err = client.add_session(session).await.unwrap_err();
        assert!(matches!(err, AppKitError::SignatureVerification));
        assert!(storage.siwx_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_dropped() {
        let storage = PersistedState::in_memory();
        let client = siwx(storage.clone());
        let mut session = signed_session(&client, 4).await;
        session.data.expiration_time = Some(Utc::now() - chrono::Duration::seconds(1));
        storage.set_siwx_sessions(&[session.clone()]).unwrap();

        let sessions = client
            .get_sessions(session.chain_id(), session.address())
            .await
            .unwrap();
        assert!(sessions.is_empty());
        assert!(storage.siwx_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_and_sign_out() {
        let storage = PersistedState::in_memory();
        let client = siwx(storage.clone());
        let a = signed_session(&client, 1).await;
        let b = signed_session(&client, 2).await;
        client.add_session(a.clone()).await.unwrap();
        client.add_session(b.clone()).await.unwrap();

        client.revoke_session(a.chain_id(), a.address()).await.unwrap();
        assert_eq!(storage.siwx_sessions().unwrap(), vec![b]);

        client.sign_out().await.unwrap();
        assert!(storage.siwx_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_policy_reflects_runtime_changes() {
        let policy = AuthenticationPolicy::disabled();
        let shared = policy.clone();
        assert!(!shared.is_enabled());

        policy.set_client(Some(Arc::new(siwx(PersistedState::in_memory()))));
        assert!(shared.is_enabled());

        policy.set_client(None);
        assert!(!shared.is_enabled());
    }
}
