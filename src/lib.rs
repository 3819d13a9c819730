pub mod abuse;
pub mod campaign;
pub mod config;
pub mod dispatch;
pub mod duration;
pub mod error;
pub mod grant;
pub mod logging;
pub mod lottery;
pub mod model;
pub mod retry;
pub mod scheduler;
pub mod storage;
