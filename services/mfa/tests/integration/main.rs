mod concurrency_test;
mod create_test;
