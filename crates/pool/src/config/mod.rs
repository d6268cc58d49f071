mod loading;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use types::{
    default_worker_count, BackendConfig, PoolConfig, PoolSettings, WorkerCountPolicy,
};
