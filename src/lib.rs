pub mod archive;
pub mod browser;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod period;
pub mod provider;
pub mod runner;
pub mod session;
