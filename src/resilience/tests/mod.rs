// src/resilience/tests/mod.rs
