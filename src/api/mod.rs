pub mod installer_api;
pub mod simple;
