pub mod classification;
pub mod job;
pub mod product;
pub mod unit;
