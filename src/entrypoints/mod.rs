mod supervisor;

pub use supervisor::run_supervisor;
