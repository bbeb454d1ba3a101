pub mod client;
pub mod memory;
pub mod omie;

pub use client::{ErpCategory, ErpClient, ErpError};
pub use memory::InMemoryErp;
pub use omie::{OmieClient, OmieConfig, OMIE_BASE_URL};
