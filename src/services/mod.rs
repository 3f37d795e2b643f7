pub mod aggregate;
pub mod archive;
pub mod identifier;
pub mod link_header;
pub mod manifest;
pub mod registry_client;
pub mod resolver;
pub mod symbol_store;
