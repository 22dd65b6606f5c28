pub mod exchanges;
pub mod system;
