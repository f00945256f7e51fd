//! 跨命名空间级联断开测试
//!
//! WalletConnect / Auth 会话在多个命名空间之间共享，断开其中一个必须一起断开；
//! injected / external 连接器互相独立。

mod common;

use std::sync::atomic::Ordering;

use appkit_core::domain::ChainNamespace;
use appkit_core::error::{AdapterError, AppKitError};
use appkit_core::infrastructure::ProviderEvent;
use appkit_core::service::{ConnectionState, RouterView};
use common::*;
use tokio_test::assert_ok;

const ALL4: [ChainNamespace; 4] = [
    ChainNamespace::Eip155,
    ChainNamespace::Solana,
    ChainNamespace::Bip122,
    ChainNamespace::Polkadot,
];

/// eip155 + bip122 走 WalletConnect，solana / polkadot 各自 injected
async fn mixed_harness() -> Harness {
    let h = harness(test_config(), &ALL4).await;
    for (namespace, connector) in [
        (ChainNamespace::Eip155, "walletConnect"),
        (ChainNamespace::Bip122, "walletConnect"),
        (ChainNamespace::Solana, "app.phantom"),
        (ChainNamespace::Polkadot, "io.talisman"),
    ] {
        h.appkit.connect(namespace, connector).await.unwrap();
    }
    h
}

#[tokio::test]
async fn test_wallet_connect_namespaces_disconnect_together() {
    let h = mixed_harness().await;

    let disconnected = assert_ok!(h.appkit.disconnect(Some(ChainNamespace::Eip155)).await);
    assert_eq!(
        disconnected,
        vec![ChainNamespace::Eip155, ChainNamespace::Bip122]
    );

    assert!(!h.appkit.is_connected(ChainNamespace::Eip155).await);
    assert!(!h.appkit.is_connected(ChainNamespace::Bip122).await);
    assert!(h.appkit.is_connected(ChainNamespace::Solana).await);
    assert!(h.appkit.is_connected(ChainNamespace::Polkadot).await);

    assert_eq!(
        h.adapter(ChainNamespace::Bip122)
            .disconnect_calls
            .load(Ordering::SeqCst),
        1
    );
    assert_eq!(
        h.adapter(ChainNamespace::Solana)
            .disconnect_calls
            .load(Ordering::SeqCst),
        0
    );
    assert_eq!(
        h.appkit.connection_state(ChainNamespace::Bip122).await,
        Some(ConnectionState::Disconnected)
    );
    assert!(h.appkit.connector_id(ChainNamespace::Bip122).await.is_none());
    assert!(h
        .appkit
        .storage()
        .connector_id(ChainNamespace::Bip122)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_auth_namespaces_disconnect_together_requested_first() {
    let h = harness(test_config(), &ALL4).await;
    h.appkit
        .connect(ChainNamespace::Eip155, "ID_AUTH")
        .await
        .unwrap();
    h.appkit
        .connect(ChainNamespace::Solana, "ID_AUTH")
        .await
        .unwrap();
    h.appkit
        .connect(ChainNamespace::Bip122, "walletConnect")
        .await
        .unwrap();

    let disconnected = h
        .appkit
        .disconnect(Some(ChainNamespace::Solana))
        .await
        .unwrap();
    assert_eq!(
        disconnected,
        vec![ChainNamespace::Solana, ChainNamespace::Eip155]
    );
    assert!(h.appkit.is_connected(ChainNamespace::Bip122).await);
}

#[tokio::test]
async fn test_injected_connector_does_not_cascade() {
    let h = harness(test_config(), &ALL4).await;
    h.appkit
        .connect(ChainNamespace::Eip155, "io.metamask")
        .await
        .unwrap();
    h.appkit
        .connect(ChainNamespace::Solana, "app.phantom")
        .await
        .unwrap();

    let disconnected = h
        .appkit
        .disconnect(Some(ChainNamespace::Eip155))
        .await
        .unwrap();
    assert_eq!(disconnected, vec![ChainNamespace::Eip155]);
    assert!(h.appkit.is_connected(ChainNamespace::Solana).await);
}

#[tokio::test]
async fn test_full_disconnect_covers_every_namespace() {
    let h = mixed_harness().await;

    let disconnected = h.appkit.disconnect(None).await.unwrap();
    assert_eq!(disconnected, ALL4.to_vec());
    assert!(h.appkit.connected_namespaces().await.is_empty());
    assert_eq!(h.appkit.current_view().await, RouterView::Connect);
    for namespace in ALL4 {
        assert!(h.appkit.account_data(namespace).await.is_none());
    }
}

#[tokio::test]
async fn test_partial_failure_is_reported_after_all_attempts() {
    let h = mixed_harness().await;
    h.adapter(ChainNamespace::Eip155)
        .fail_disconnect(AdapterError::Provider("relay unreachable".into()));

    let err = h
        .appkit
        .disconnect(Some(ChainNamespace::Eip155))
        .await
        .unwrap_err();
    match err {
        AppKitError::CascadeDisconnect {
            disconnected,
            failures,
        } => {
            assert_eq!(disconnected, vec![ChainNamespace::Bip122]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, ChainNamespace::Eip155);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // 本地状态无论如何都会清除
    assert!(!h.appkit.is_connected(ChainNamespace::Eip155).await);
    assert!(!h.appkit.is_connected(ChainNamespace::Bip122).await);
    assert_eq!(
        h.adapter(ChainNamespace::Bip122)
            .disconnect_calls
            .load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_disconnect_when_already_disconnected_is_noop() {
    let h = harness(test_config(), &ALL4).await;

    let disconnected = h
        .appkit
        .disconnect(Some(ChainNamespace::Polkadot))
        .await
        .unwrap();
    assert_eq!(disconnected, vec![ChainNamespace::Polkadot]);
    assert_eq!(
        h.appkit.connection_state(ChainNamespace::Polkadot).await,
        Some(ConnectionState::Disconnected)
    );
    assert!(h
        .appkit
        .connection_history(ChainNamespace::Polkadot)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_unregistered_namespace_is_an_error() {
    let h = harness(test_config(), &[ChainNamespace::Eip155]).await;
    assert!(matches!(
        h.appkit.disconnect(Some(ChainNamespace::Tron)).await,
        Err(AppKitError::NamespaceNotRegistered(ChainNamespace::Tron))
    ));
}

#[tokio::test]
async fn test_wallet_disconnect_event_tears_down_session_group() {
    let h = mixed_harness().await;

    assert!(h
        .adapter(ChainNamespace::Bip122)
        .emit(ProviderEvent::Disconnect));
    assert_eq!(h.appkit.process_provider_events().await, 1);

    assert!(!h.appkit.is_connected(ChainNamespace::Eip155).await);
    assert!(!h.appkit.is_connected(ChainNamespace::Bip122).await);
    assert!(h.appkit.is_connected(ChainNamespace::Solana).await);
    // 钱包侧已断开，不再调用适配器
    assert_eq!(
        h.adapter(ChainNamespace::Eip155)
            .disconnect_calls
            .load(Ordering::SeqCst),
        0
    );

    // 重复投递不会产生额外变化
    assert!(h
        .adapter(ChainNamespace::Bip122)
        .emit(ProviderEvent::Disconnect));
    assert_eq!(h.appkit.process_provider_events().await, 1);
    assert!(h.appkit.is_connected(ChainNamespace::Polkadot).await);
}
