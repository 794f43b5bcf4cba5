//! Multiwallet Core Library
//!
//! Orchestrates one wallet across several networks: Bitcoin and Liquid,
//! singlesig and multisig, a Lightning node and a Liquid swap engine.
//!
//! Each network is served by its own session. Sessions serialise their backend
//! calls, resolve two-factor challenges and surface backend notifications as
//! typed [`DomainEvent`]s. The [`WalletCoordinator`] logs every session in
//! concurrently and aggregates subaccounts, balances and history, so one
//! failing network never takes the others down.
//!
//! Backends are abstracted through traits ([`RpcSessionFactory`],
//! [`LightningNodeFactory`], [`DescriptorWalletFactory`], [`AssetsProvider`],
//! [`StateStorage`]) that can be implemented for any transport.
//!
//! # Example
//!
//! ```rust,ignore
//! use multiwallet_core::{
//!     Backends, CoordinatorConfig, Credentials, LoginParams, NetworkIdentity, WalletCoordinator,
//! };
//!
//! let coordinator = WalletCoordinator::new(
//!     CoordinatorConfig::new(NetworkIdentity::BitcoinSinglesig),
//!     backends,
//! );
//!
//! let credentials = Credentials::from_mnemonic(mnemonic, None);
//! let lightning = WalletCoordinator::derive_lightning_credentials(&credentials)?;
//! coordinator
//!     .login(LoginParams::software(credentials).with_lightning(lightning))
//!     .await?;
//!
//! let subaccounts = coordinator.subaccounts(false).await?;
//! let balances = coordinator.balances(&subaccounts).await?;
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod identity;
pub mod lightning;
pub mod lwk;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod types;

pub use backend::{
    AssetsProvider, BackendError, BackendFuture, ChallengeResolver, DescriptorWallet,
    DescriptorWalletFactory, HwSigner, LightningNode, LightningNodeFactory, RpcSession,
    RpcSessionFactory, TwoFactorCall,
};
pub use config::{CoordinatorConfig, NetworkSettings, ResolverConfig};
pub use coordinator::{
    Backends, Failures, LoginOutcome, LoginParams, PAGE_SIZE, SkipReason, WalletCoordinator,
};
pub use error::{Error, Result};
pub use events::{DomainEvent, EventKind, EventRouter, EventStream, SubaccountEvent};
pub use identity::WalletKeys;
pub use lightning::LightningSession;
pub use lwk::DescriptorSession;
pub use queue::SerialQueue;
pub use registry::{AssetInfo, AssetRegistry, RegistryClient};
pub use session::{NetworkSession, SessionHandle};
pub use storage::{DatadirStorage, StateStorage, StateStorageExt, StorageFuture};
pub use types::{
    Balances, Credentials, HwDevice, LoginResult, NetworkIdentity, Subaccount, Transaction,
    WalletAccount,
};
