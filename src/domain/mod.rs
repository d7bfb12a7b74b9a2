//! Domain Module
//!
//! Pure scan/connect logic with no hardware access.

pub mod advertisement;
pub mod filter;
pub mod link;
pub mod models;
pub mod settings;
