pub mod health;
pub mod trades;
pub mod upload;

pub use health::{health_check, metrics_handler, readiness_check};
pub use trades::{list_subscription_trades, update_subscription_trade};
pub use upload::upload_subscriptions;
