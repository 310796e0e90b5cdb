//! 基础设施层：持有稀缺资源，只暴露能力

pub mod gateway_client;

pub use gateway_client::{GatewayClient, GatewayResponse};
