pub mod error;
pub mod postgres;
pub mod types;
pub mod warehouse;

pub use postgres::PostgresService;
pub use warehouse::WarehouseService;
