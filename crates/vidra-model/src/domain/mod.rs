mod task_id;
pub use task_id::TaskId;

mod task_status;
pub use task_status::TaskStatus;

mod task_info;
pub use task_info::{FailedTask, SupervisorStatus, TaskExit, TaskInfo};

mod task_query;
pub use task_query::{TaskPage, TaskQuery};
