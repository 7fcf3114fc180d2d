//! End-to-end protocol scenarios over the in-process transport

mod support;
