pub mod market;

pub use market::MarketRecord;
