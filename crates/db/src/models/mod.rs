pub mod job;

pub use job::{Job, JobListQuery, JobLog};
