pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod job_store;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod reconciler;
pub mod server;

#[cfg(test)]
mod test_support;
