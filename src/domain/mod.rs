pub mod entities;
pub mod proration;
