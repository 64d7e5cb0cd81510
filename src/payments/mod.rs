// Payment backend adapters: the payment gateway HTTP API and the wallet JSON-RPC
pub mod gateway;
pub mod models;
pub mod traits;
pub mod wallet_rpc;

pub use gateway::GatewayClient;
pub use traits::{PaymentGateway, WalletBackend};
pub use wallet_rpc::WalletRpcClient;
