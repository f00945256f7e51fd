//! Sign-In-With-X
//!
//! 可选的签名认证步骤，位于 CONNECT_SUCCESS 与 connected 之间。

pub mod client;
pub mod gate;
pub mod message;
pub mod verifier;

pub use client::{AuthenticationPolicy, DefaultSiwx, SiwxClient};
pub use gate::{AuthenticationRequest, SiwxGate};
pub use message::{InformalMessenger, SiwxMessage, SiwxMessageData, SiwxMessageInput, SiwxSession};
pub use verifier::{Eip155Verifier, SiwxVerifier, SolanaVerifier};
