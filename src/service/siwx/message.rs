//! SIWX 消息（CAIP-122 文本格式）

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CaipNetworkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiwxMessageData {
    pub account_address: String,
    pub chain_id: CaipNetworkId,
    /// 消息首行展示的网络名称
    pub network_name: String,
    pub domain: String,
    pub uri: String,
    pub version: String,
    pub nonce: String,
    pub statement: Option<String>,
    pub resources: Vec<String>,
    pub request_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SiwxMessageData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|exp| exp <= now)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.not_before.map_or(true, |nb| nb <= now)
    }
}

/// 待签名的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiwxMessage {
    pub data: SiwxMessageData,
}

impl SiwxMessage {
    pub fn new(data: SiwxMessageData) -> Self {
        Self { data }
    }
}

impl fmt::Display for SiwxMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data;

        writeln!(
            f,
            "{} wants you to sign in with your {} account:",
            d.domain, d.network_name
        )?;
        writeln!(f, "{}", d.account_address)?;
        writeln!(f)?;
        if let Some(statement) = &d.statement {
            writeln!(f, "{}", statement)?;
            writeln!(f)?;
        }
        writeln!(f, "URI: {}", d.uri)?;
        writeln!(f, "Version: {}", d.version)?;
        writeln!(f, "Chain ID: {}", d.chain_id)?;
        writeln!(f, "Nonce: {}", d.nonce)?;
        write!(f, "Issued At: {}", format_time(&d.issued_at))?;
        if let Some(exp) = &d.expiration_time {
            write!(f, "\nExpiration Time: {}", format_time(exp))?;
        }
        if let Some(nb) = &d.not_before {
            write!(f, "\nNot Before: {}", format_time(nb))?;
        }
        if let Some(request_id) = &d.request_id {
            write!(f, "\nRequest ID: {}", request_id)?;
        }
        if !d.resources.is_empty() {
            write!(f, "\nResources:")?;
            for resource in &d.resources {
                write!(f, "\n- {}", resource)?;
            }
        }
        Ok(())
    }
}

/// 已签名并验证的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiwxSession {
    pub data: SiwxMessageData,
    pub message: String,
    pub signature: String,
}

impl SiwxSession {
    pub fn address(&self) -> &str {
        &self.data.account_address
    }

    pub fn chain_id(&self) -> &CaipNetworkId {
        &self.data.chain_id
    }

    /// 会话是否属于该账户（EVM 地址比较忽略大小写）
    pub fn belongs_to(&self, chain_id: &CaipNetworkId, address: &str) -> bool {
        &self.data.chain_id == chain_id && self.data.account_address.eq_ignore_ascii_case(address)
    }
}

/// 创建消息所需的账户信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiwxMessageInput {
    pub account_address: String,
    pub chain_id: CaipNetworkId,
    pub network_name: String,
}

/// 非正式消息模板：固定 domain/uri/statement，随机 nonce
#[derive(Debug, Clone)]
pub struct InformalMessenger {
    pub domain: String,
    pub uri: String,
    pub statement: Option<String>,
    pub resources: Vec<String>,
    pub expiration: Option<Duration>,
}

impl InformalMessenger {
    pub fn new(domain: &str, uri: &str) -> Self {
        Self {
            domain: domain.to_string(),
            uri: uri.to_string(),
            statement: None,
            resources: Vec::new(),
            expiration: None,
        }
    }

    pub fn with_statement(mut self, statement: &str) -> Self {
        self.statement = Some(statement.to_string());
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resources.push(resource.to_string());
        self
    }

    pub fn generate_nonce(&self) -> String {
        hex::encode(rand::random::<[u8; 16]>())
    }

    pub fn create_message(&self, input: SiwxMessageInput, nonce: String) -> SiwxMessage {
        let issued_at = Utc::now();
        let expiration_time = self
            .expiration
            .and_then(|exp| chrono::Duration::from_std(exp).ok())
            .map(|exp| issued_at + exp);

        SiwxMessage::new(SiwxMessageData {
            account_address: input.account_address,
            chain_id: input.chain_id,
            network_name: input.network_name,
            domain: self.domain.clone(),
            uri: self.uri.clone(),
            version: "1".to_string(),
            nonce,
            statement: self.statement.clone(),
            resources: self.resources.clone(),
            request_id: None,
            issued_at,
            expiration_time,
            not_before: None,
        })
    }
}
