pub mod process;
pub mod process_step;

pub use process::{Process, ProcessRow};
pub use process_step::{NewProcessStep, ProcessStep, ProcessStepRow};
