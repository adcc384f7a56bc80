pub mod blame;
pub mod index;
pub mod stats;
