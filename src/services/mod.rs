pub mod process_service;

pub use process_service::{init_process_service, process_service, ProcessService, SystemStats};
