pub mod catalog;
pub mod consts;
pub mod lock;
pub mod persistence;
pub mod printer;
pub mod store;
pub mod system_manager;
