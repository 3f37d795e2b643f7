pub mod health_handlers;
pub mod symbol_handlers;
