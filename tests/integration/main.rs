//! Integration tests, run against the in-process store
//!
//! `postgres_tests` needs `DATABASE_URL` and only runs with `--ignored`.

mod circulation_tests;
