//! # Worker 控制通道层
//!
//! 提供与长期运行的代理/隧道 worker 进程之间的异步控制通道。
//!
//! ## 主要功能
//! - **绑定管理**: 建立与 worker 的绑定，每个客户端最多一个活动绑定
//! - **控制命令**: start / stop / reload / queryState
//! - **事件推送**: 状态变化、流量采样、流量持久化事件按顺序推送
//! - **存活检测**: 通道断开时事件流结束，由上层触发自动重连
//!
//! ## 模块结构
//! - `traits`: 控制通道的核心 trait 定义
//! - `types`: JSON 线路协议类型
//! - `connection`: WebSocket 通道实现
//! - `mock`: 用于测试的进程内 Mock worker
//!
//! ## 使用示例
//! ```rust,no_run
//! use veilsync::worker::{WorkerChannel, WorkerConnector, WsWorkerConnector};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = WsWorkerConnector::new("ws://127.0.0.1:1090", Duration::from_secs(5));
//! let channel = connector.bind().await?;
//! println!("Worker state: {}", channel.query_state().await?);
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod types;
pub mod connection;
pub mod mock;


pub use traits::{TrafficStats, WorkerChannel, WorkerConnector, WorkerEvent};

// Re-export implementation structs
pub use connection::{WsWorkerChannel, WsWorkerConnector};

// Re-export mock for development/testing
pub use mock::{MockWorker, MockWorkerChannel, MockWorkerConnector};
