//! 基础设施模块
//!
//! 提供配置、日志、错误处理等基础能力。

pub mod config;
pub mod error;
pub mod logging;
