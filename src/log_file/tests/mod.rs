pub mod helpers;
mod tests_pool;
mod tests_truncation;
