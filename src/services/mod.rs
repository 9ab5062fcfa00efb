pub mod backend;
pub mod gateway;
pub mod poller;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
