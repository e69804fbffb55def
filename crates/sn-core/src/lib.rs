//! sn-core: switch-notice core library
//!
//! 受信メッセージのフィルタリング、固定文の自動返信、初回コンタクトへの
//! 添付ファイル送信、およびセッション/状態の永続化を提供します。
//! 実際のチャット接続は [`Gateway`] トレイトの実装に委譲されます。

pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod lifecycle;
pub mod pairing;
pub mod responder;
pub mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{BotConfig, BridgeConfig, ConnectionConfig, FilterConfig, ReplyConfig, StorageConfig};
pub use error::{Error, GatewayError, Result};
pub use filter::{IgnoreReason, MessageFilter, Verdict};
pub use gateway::{
    ClientIdentity, Gateway, GatewayEvents, InboundMessage, MediaAttachment, MessageSource,
    SessionToken,
};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use responder::{AttachmentOutcome, Responder, ResponseOutcome};
pub use store::{FirstContactSet, SessionStore};
