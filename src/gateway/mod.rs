//! HTTP 网关：NDJSON 流式接口与健康检查

pub mod routes;
pub mod timefmt;

pub use routes::{build_router, GatewayState};
pub use timefmt::replace_iso8601_with_relative;
