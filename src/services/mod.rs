pub mod bus;
pub mod fetch;
pub mod imageproc;
pub mod processor;
pub mod publisher;
pub mod storage;
