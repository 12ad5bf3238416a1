pub mod leg;
pub mod normalize;
pub mod resolver;
pub mod valuation;
