pub mod sleep_lock;
pub mod spin_lock;
pub mod wait_queue;
