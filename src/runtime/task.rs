use uuid::Uuid;

use crate::runtime::error::WorkError;

pub type TaskId = Uuid;

// The core trait that both manual tasks and the `#[task]` macro implement.
// A task runs exactly once and reports either a value or a failure.
pub trait Task: Send + 'static {
    type Output: Clone + Send + 'static;

    fn call(self) -> Result<Self::Output, WorkError>;

    // Generate a unique task ID
    fn task_id(&self) -> TaskId {
        Uuid::new_v4()
    }
}

// This is what the macro generates for each function
pub struct TaskWrapper<F> {
    func: F,
}

impl<F, T> TaskWrapper<F>
where
    F: FnOnce() -> Result<T, WorkError> + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, T> Task for TaskWrapper<F>
where
    F: FnOnce() -> Result<T, WorkError> + Send + 'static,
    T: Clone + Send + 'static,
{
    type Output = T;

    fn call(self) -> Result<T, WorkError> {
        (self.func)()
    }
}
