pub mod cv;
pub mod intr_cell;
pub mod lock;
pub mod semaphore;

pub use cv::Cv;
pub use intr_cell::IntrCell;
pub use lock::Lock;
pub use semaphore::Semaphore;
