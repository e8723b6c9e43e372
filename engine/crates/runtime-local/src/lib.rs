mod kv;

pub use kv::InMemoryKvStore;
