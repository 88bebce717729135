pub(crate) mod async_task;

pub mod path;

pub(crate) mod time;
