mod capability_tests;
mod lifecycle_tests;
mod sandbox_tests;
