pub mod central_bank;
pub mod exchange;
pub mod rss;
pub mod social;
pub mod spot_metal;
