pub mod bolsa;
pub mod holding;
pub mod price;
pub mod settings;
pub mod snapshot;
pub mod transaction;
