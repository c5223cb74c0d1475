mod checkpoint_tests;
mod network_tests;
