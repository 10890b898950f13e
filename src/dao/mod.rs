pub mod kv_store;
pub mod models;
pub mod storage;
