//! Loki MCP 工具核心库
//! 参数解析 → 时间解析 → URL 构造 → HTTP 请求 → 结果格式化，传输层与之解耦。

pub mod app;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod http;
pub mod mcp;
pub mod model;
pub mod params;
pub mod timeparse;
pub mod tools;
