//! Offer 模块
//!
//! - `manager`: Offer 状态机与级联效果
//! - `token`: 顾客侧凭证生成

mod manager;
mod token;

pub use manager::OfferLifecycleManager;
pub use token::generate_token;
