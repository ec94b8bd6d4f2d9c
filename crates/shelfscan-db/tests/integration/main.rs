mod common;
mod product_store_tests;
mod run_archive_tests;
