#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod selection;
pub mod services;
pub mod store;

#[cfg(any(feature = "test", test))]
#[allow(unused)]
pub mod test;
