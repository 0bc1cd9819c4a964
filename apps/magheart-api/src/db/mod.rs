pub mod archive;
pub mod kv;
