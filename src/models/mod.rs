pub mod amount;
pub mod gift;
