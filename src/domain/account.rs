//! 账户状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CaipAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Connecting,
    Reconnecting,
    Connected,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Connecting => "connecting",
            AccountStatus::Reconnecting => "reconnecting",
            AccountStatus::Connected => "connected",
            AccountStatus::Disconnected => "disconnected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "connecting" => Some(AccountStatus::Connecting),
            "reconnecting" => Some(AccountStatus::Reconnecting),
            "connected" => Some(AccountStatus::Connected),
            "disconnected" => Some(AccountStatus::Disconnected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    #[default]
    Eoa,
    SmartAccount,
    Payment,
    Ordinal,
}

/// 命名空间内的账户状态（由 ChainController 独占维护）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub address: Option<String>,
    pub caip_address: Option<CaipAddress>,
    pub status: AccountStatus,
    pub all_accounts: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl AccountState {
    pub fn connecting() -> Self {
        Self {
            address: None,
            caip_address: None,
            status: AccountStatus::Connecting,
            all_accounts: Vec::new(),
            connected_at: None,
        }
    }

    pub fn connected(caip_address: CaipAddress, all_accounts: Vec<String>) -> Self {
        Self {
            address: Some(caip_address.address().to_string()),
            caip_address: Some(caip_address),
            status: AccountStatus::Connected,
            all_accounts,
            connected_at: Some(Utc::now()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == AccountStatus::Connected
    }
}

/// `get_account_data` 的返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountData {
    pub address: Option<String>,
    pub caip_address: Option<CaipAddress>,
    pub status: AccountStatus,
    pub preferred_account_type: AccountType,
}
