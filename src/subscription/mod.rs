//! # 订阅同步
//!
//! 将远程订阅源与本地存储的代理服务器配置保持一致。
//!
//! ## 主要功能
//! - **订阅创建**: 拉取、解码并校验分组，拒绝重复分组
//! - **订阅更新**: 空订阅清理本组配置，分组改名仅标记状态，否则按服务器身份对账
//! - **MAX 指令**: 按 `MAX=<n>` 随机保留 n 个配置
//! - **代理选择**: 按服务模式与中间代理决定直连或经 SOCKS 拉取，凭据随请求传递
//!
//! ## 模块结构
//! - `traits`: 订阅记录、存储与拉取 trait
//! - `profile`: 配置记录与 `ssr://` URI 编解码
//! - `document`: base64 文档解码与 `MAX=` 解析
//! - `fetcher`: 代理选择策略与 reqwest 实现
//! - `store`: 内存存储
//! - `manager`: `SubscriptionManager` 同步引擎
//! - `mock`: 用于测试的脚本化拉取器
//!
//! ## 使用示例
//! ```rust,no_run
//! use std::sync::Arc;
//! use veilsync::config::Config;
//! use veilsync::subscription::{
//!     HttpFetcher, MemoryProfileStore, MemorySubscriptionStore, SubscriptionManager,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let manager = SubscriptionManager::new(
//!     Arc::new(MemoryProfileStore::new()),
//!     Arc::new(MemorySubscriptionStore::new()),
//!     Arc::new(HttpFetcher::from_config(&config)),
//!     config.network_settings()?,
//! );
//! let subscription = manager.create("https://example.com/sub", false).await?;
//! println!("{} -> {:?}", subscription.group, subscription.status);
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod profile;
pub mod document;
pub mod fetcher;
pub mod store;
pub mod manager;
pub mod mock;


pub use traits::{Fetcher, ProfileStore, Subscription, SubscriptionStatus, SubscriptionStore};
pub use profile::Profile;
pub use document::{decode_document, parse_document, parse_max_directive, ParsedDocument};
pub use fetcher::{Credentials, FetchRoute, HttpFetcher, NetworkSettings};
pub use store::{MemoryProfileStore, MemorySubscriptionStore};
pub use manager::{SubscriptionManager, SyncReport};
pub use mock::{FetchCall, MockFetcher};
