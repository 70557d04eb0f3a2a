pub use dagrun_test_utils::init_tracing;
