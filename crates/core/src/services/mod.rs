pub mod bolsa_service;
pub mod ledger_service;
pub mod price_service;
pub mod scheduler;
pub mod snapshot_service;
pub mod valuation_service;
