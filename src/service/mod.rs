//! # 服务连接层
//!
//! 管理与 worker 进程的会话级绑定，并将 worker 的生命周期暴露为可观察的状态机。
//!
//! ## 主要功能
//! - **连接管理**: connect / disconnect，重复 connect 幂等
//! - **状态机**: Idle → Connecting → Connected → Stopping → Idle|Stopped，由 worker 驱动
//! - **状态对账**: 每次绑定后立即向回调目标推送 worker 当前状态
//! - **流量采样**: 可随时调整的采样间隔，0 表示暂停
//! - **自动恢复**: 通道意外断开时透明重连，不向观察者报告错误
//!
//! ## 模块结构
//! - `state`: `ServiceState` 以及 `can_stop` / `can_start`
//! - `traits`: 回调目标 trait 与重连策略
//! - `connection`: `ServiceConnection` 实现
//! - `mock`: 用于测试的记录型回调
//!
//! ## 使用示例
//! ```rust,no_run
//! use veilsync::service::{ServiceConnection, ReconnectPolicy, RecordingCallback};
//! use veilsync::worker::WsWorkerConnector;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(WsWorkerConnector::new("ws://127.0.0.1:1090", Duration::from_secs(5)));
//! let connection = ServiceConnection::new(connector, ReconnectPolicy::default());
//! connection.set_bandwidth_interval(500).await;
//! connection.connect(Arc::new(RecordingCallback::new())).await?;
//! connection.toggle().await;
//! # Ok(())
//! # }
//! ```

pub mod state;
pub mod traits;
pub mod connection;
pub mod mock;

#[cfg(test)]
mod tests;

pub use state::{can_start, can_stop, ServiceState};
pub use traits::{ReconnectPolicy, ServiceCallback};
pub use connection::ServiceConnection;
pub use mock::{CallbackRecord, RecordingCallback};
