pub mod addr;
pub mod captable;
pub mod plan;
pub mod rows;
