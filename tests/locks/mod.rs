mod exclusive;
mod read_write;
