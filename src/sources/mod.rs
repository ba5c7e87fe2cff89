pub mod market_ws;
pub mod sim;

pub use market_ws::MarketWs;
pub use sim::SimFeed;
